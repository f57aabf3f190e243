//! Records mirrored from the canvas backend.
//!
//! All of these are created and mutated by the backend; the client only holds
//! read-mostly copies refreshed by polling. Field names follow the backend's
//! camelCase JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_file_kind() -> String {
    "file".to_string()
}

fn default_status() -> String {
    "idle".to_string()
}

/// A file node on the canvas (`GET /files`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    #[serde(rename = "type", default = "default_file_kind")]
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_expanded: bool,
    #[serde(default)]
    pub is_modified: bool,
    /// Id of the containing folder. A lookup key, not ownership.
    #[serde(default)]
    pub parent_folder: Option<String>,
}

/// Descriptive metadata for one node (a value of the `GET /metadata` object).
///
/// The backend stores folders, layout and agent annotations in the same map,
/// so fields this client does not know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Node id -> metadata. Ordered so equality never depends on key order.
pub type Metadata = BTreeMap<String, NodeMetadata>;

/// Parse the raw `GET /metadata` body.
pub fn parse_metadata(raw: &str) -> Result<Metadata, serde_json::Error> {
    serde_json::from_str(raw)
}

/// A folder node (`GET /folders`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub is_expanded: bool,
    /// File ids in display order. References, not ownership.
    #[serde(default)]
    pub contained_files: Vec<String>,
    #[serde(default)]
    pub parent_folder: Option<String>,
}

/// A directed connection between two nodes (`GET /edges`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of `POST /files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreate {
    pub file_path: String,
    pub file_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
}

/// Severity of a backend output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputLevel {
    Info,
    Success,
    Error,
    Debug,
}

/// One asynchronous progress message from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    /// Wall-clock time as `HH:MM:SS`, as written by the backend.
    pub timestamp: String,
    pub level: OutputLevel,
    pub message: String,
}

/// Body of `GET /output`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLog {
    #[serde(default)]
    pub messages: Vec<OutputMessage>,
}

/// One entry of `GET /projects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Everything fetched in one poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanvasSnapshot {
    pub files: Vec<FileRecord>,
    pub metadata: Metadata,
    pub folders: Vec<FolderRecord>,
    pub edges: Vec<EdgeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_defaults() {
        let file: FileRecord =
            serde_json::from_str(r#"{"id":"1","label":"main.py","x":10,"y":20}"#).unwrap();
        assert_eq!(file.kind, "file");
        assert_eq!(file.status, "idle");
        assert!(!file.is_modified);
        assert!(file.parent_folder.is_none());
    }

    #[test]
    fn test_file_record_camel_case() {
        let file: FileRecord = serde_json::from_str(
            r#"{"id":"2","label":"app.ts","filePath":"src/app.ts","fileType":"typescript","isModified":true,"parentFolder":"folder_1"}"#,
        )
        .unwrap();
        assert_eq!(file.file_path.as_deref(), Some("src/app.ts"));
        assert_eq!(file.file_type.as_deref(), Some("typescript"));
        assert!(file.is_modified);
        assert_eq!(file.parent_folder.as_deref(), Some("folder_1"));
    }

    #[test]
    fn test_metadata_equality_ignores_key_order() {
        let a = parse_metadata(r#"{"1":{"type":"file","description":"entry","x":1.0},"2":{"name":"b"}}"#)
            .unwrap();
        let b = parse_metadata(r#"{"2":{"name":"b"},"1":{"x":1.0,"description":"entry","type":"file"}}"#)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_metadata_keeps_unknown_fields() {
        let meta = parse_metadata(
            r#"{"folder_1":{"type":"folder","containedFiles":["1","2"],"isExpanded":true}}"#,
        )
        .unwrap();
        let folder = &meta["folder_1"];
        assert_eq!(folder.kind.as_deref(), Some("folder"));
        assert_eq!(folder.extra["containedFiles"], serde_json::json!(["1", "2"]));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["folder_1"]["isExpanded"], serde_json::json!(true));
    }

    #[test]
    fn test_parse_metadata_rejects_invalid_json() {
        assert!(parse_metadata("{not json").is_err());
    }

    #[test]
    fn test_edge_type_rename() {
        let edge: EdgeRecord =
            serde_json::from_str(r#"{"from":"1","to":"2","type":"imports"}"#).unwrap();
        assert_eq!(edge.kind.as_deref(), Some("imports"));
        assert!(edge.description.is_none());
    }

    #[test]
    fn test_output_levels() {
        let log: OutputLog = serde_json::from_str(
            r#"{"messages":[{"timestamp":"12:00:01","level":"SUCCESS","message":"done"},{"timestamp":"12:00:02","level":"DEBUG","message":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(log.messages[0].level, OutputLevel::Success);
        assert_eq!(log.messages[1].level, OutputLevel::Debug);
    }
}
