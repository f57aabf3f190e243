//! Node creation and configuration form.
//!
//! A small state machine: `open` fills the fields, setters edit them, and the
//! form ends in either `submit` (validated, handler called) or `cancel` /
//! `dismiss` (handler not called). Closing always resets the fields to the
//! values it was opened with.

use crate::records::FileCreate;
use std::path::Path;
use thiserror::Error;

/// Extension -> file type label understood by the backend.
const FILE_TYPES: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("json", "json"),
    ("html", "html"),
    ("css", "css"),
    ("md", "markdown"),
    ("txt", "text"),
];

/// Type used for unknown or missing extensions.
pub const FALLBACK_FILE_TYPE: &str = "text";

/// Label used for nodes created without one.
const UNTITLED: &str = "Untitled";

/// Map a file name to the backend's file type label.
pub fn detect_file_type(file_name: &str) -> &'static str {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .and_then(|ext| {
            FILE_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, kind)| *kind)
        })
        .unwrap_or(FALLBACK_FILE_TYPE)
}

/// Append `.txt` to names without an extension.
pub fn ensure_extension(file_name: &str) -> String {
    if Path::new(file_name).extension().is_some() {
        file_name.to_string()
    } else {
        format!("{}.txt", file_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    #[default]
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("File name is required")]
    MissingFileName,

    #[error("Form is not open")]
    NotOpen,
}

/// Values a form is opened with; also what it resets to on close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFormInit {
    pub kind: NodeKind,
    pub label: String,
    pub description: String,
    pub category: String,
    pub file_name: Option<String>,
}

/// A validated configuration handed to the submit handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub kind: NodeKind,
    pub label: String,
    pub description: String,
    pub category: String,
    /// Resolved name including extension; only set for files
    pub file_name: Option<String>,
    pub file_type: Option<String>,
}

impl NodeConfig {
    /// Request body for creating this node as a file, if it is one.
    pub fn to_file_create(&self) -> Option<FileCreate> {
        Some(FileCreate {
            file_path: self.file_name.clone()?,
            file_type: self.file_type.clone()?,
            content: String::new(),
            description: self.description.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct NodeForm {
    initial: NodeFormInit,
    label: String,
    description: String,
    category: String,
    file_name: String,
    is_open: bool,
    error: Option<FormError>,
}

impl NodeForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open with `initial` values, replacing whatever was there.
    pub fn open(&mut self, initial: NodeFormInit) {
        self.initial = initial;
        self.reset();
        self.is_open = true;
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn kind(&self) -> NodeKind {
        self.initial.kind
    }

    /// Validation error from the last submit attempt, if any.
    pub fn error(&self) -> Option<&FormError> {
        self.error.as_ref()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn set_label(&mut self, value: impl Into<String>) {
        self.label = value.into();
    }

    pub fn set_description(&mut self, value: impl Into<String>) {
        self.description = value.into();
    }

    pub fn set_category(&mut self, value: impl Into<String>) {
        self.category = value.into();
    }

    pub fn set_file_name(&mut self, value: impl Into<String>) {
        self.file_name = value.into();
        self.error = None;
    }

    /// Typed name, falling back to the one the form was opened with.
    pub fn resolved_file_name(&self) -> Option<String> {
        let typed = self.file_name.trim();
        if !typed.is_empty() {
            return Some(typed.to_string());
        }
        self.initial
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// File type for the current name, for live display while typing.
    pub fn detected_file_type(&self) -> &'static str {
        self.resolved_file_name()
            .map(|name| detect_file_type(&name))
            .unwrap_or(FALLBACK_FILE_TYPE)
    }

    fn build(&self) -> Result<NodeConfig, FormError> {
        let (file_name, file_type) = match self.initial.kind {
            NodeKind::File => {
                let name = self.resolved_file_name().ok_or(FormError::MissingFileName)?;
                let file_type = detect_file_type(&name).to_string();
                (Some(ensure_extension(&name)), Some(file_type))
            }
            NodeKind::Folder | NodeKind::Generic => (None, None),
        };

        let label = match self.label.trim() {
            "" => file_name.clone().unwrap_or_else(|| UNTITLED.to_string()),
            label => label.to_string(),
        };

        Ok(NodeConfig {
            kind: self.initial.kind,
            label,
            description: self.description.trim().to_string(),
            category: self.category.trim().to_string(),
            file_name,
            file_type,
        })
    }

    /// Validate and hand the configuration to `handler`, then close.
    ///
    /// On a validation error the form stays open, the error is kept for
    /// display and `handler` is not called.
    pub fn submit<F>(&mut self, handler: F) -> Result<(), FormError>
    where
        F: FnOnce(NodeConfig),
    {
        if !self.is_open {
            return Err(FormError::NotOpen);
        }

        match self.build() {
            Ok(config) => {
                handler(config);
                self.close();
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Close via the cancel action.
    pub fn cancel(&mut self) {
        self.close();
    }

    /// Close by clicking outside the form.
    pub fn dismiss(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.is_open = false;
        self.reset();
    }

    fn reset(&mut self) {
        self.label = self.initial.label.clone();
        self.description = self.initial.description.clone();
        self.category = self.initial.category.clone();
        self.file_name = self.initial.file_name.clone().unwrap_or_default();
        self.error = None;
    }
}
