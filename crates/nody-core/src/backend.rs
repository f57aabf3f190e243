//! Backend trait abstraction for the canvas service.
//!
//! Implementations:
//! - `InMemoryBackend` - For testing
//! - `HttpBackend` (in nody-client) - Talks to the backend over HTTP with reqwest

use crate::records::{
    parse_metadata, CanvasSnapshot, EdgeRecord, FileCreate, FileRecord, FolderRecord, Metadata,
    NodeMetadata, OutputLog, OutputMessage, ProjectSummary,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("{detail} (status {status})")]
    Status { status: u16, detail: String },

    #[error("Invalid response payload: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Raw body chunks of a streamed command response.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// The canvas backend as seen by the client.
///
/// Every call is a suspension point; implementations must be `Send + Sync`
/// so pollers can run on the tokio runtime.
#[async_trait]
pub trait Backend: Send + Sync {
    /// All file nodes
    async fn files(&self) -> Result<Vec<FileRecord>>;

    /// The metadata object exactly as the backend sent it
    async fn metadata_raw(&self) -> Result<String>;

    /// Parsed metadata. Invalid JSON is a `Decode` error.
    async fn metadata(&self) -> Result<Metadata> {
        let raw = self.metadata_raw().await?;
        parse_metadata(&raw).map_err(|e| BackendError::Decode(format!("metadata: {}", e)))
    }

    /// All folder nodes
    async fn folders(&self) -> Result<Vec<FolderRecord>>;

    /// All edges
    async fn edges(&self) -> Result<Vec<EdgeRecord>>;

    /// Asynchronous progress messages
    async fn output(&self) -> Result<OutputLog>;

    /// Existing projects
    async fn projects(&self) -> Result<Vec<ProjectSummary>>;

    /// Create a project; returns the backend's JSON reply
    async fn create_project(
        &self,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Create a file node
    async fn create_file(&self, file: &FileCreate) -> Result<FileRecord>;

    /// Replace a node's description
    async fn update_description(&self, node_id: &str, description: &str) -> Result<()>;

    /// Start a terminal command and stream its event lines
    async fn execute_stream(&self, command: &str) -> Result<ByteStream>;
}

/// Fetch files, metadata, folders and edges together.
///
/// The cycle resolves only once all four have; if any one fails the whole
/// snapshot is an error and nothing from it should be applied.
pub async fn fetch_snapshot<B: Backend + ?Sized>(backend: &B) -> Result<CanvasSnapshot> {
    let (files, metadata, folders, edges) = futures::try_join!(
        backend.files(),
        backend.metadata(),
        backend.folders(),
        backend.edges()
    )?;

    Ok(CanvasSnapshot {
        files,
        metadata,
        folders,
        edges,
    })
}

/// Endpoints of `InMemoryBackend`, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Files,
    Metadata,
    Folders,
    Edges,
    Output,
    Projects,
    Terminal,
}

#[derive(Default)]
struct InMemoryState {
    files: Vec<FileRecord>,
    metadata: Metadata,
    folders: Vec<FolderRecord>,
    edges: Vec<EdgeRecord>,
    output: OutputLog,
    projects: Vec<ProjectSummary>,
    command_stream: Vec<Result<Vec<u8>>>,
    executed: Vec<String>,
}

/// Enough permits for every fetch a test can issue.
const RELEASED_PERMITS: usize = 1024;

/// Holds fetches in flight until released.
pub struct FetchGate {
    permits: Arc<Semaphore>,
}

impl FetchGate {
    /// Let every held and future fetch through.
    pub fn release(&self) {
        self.permits.add_permits(RELEASED_PERMITS);
    }
}

/// In-memory backend for testing
pub struct InMemoryBackend {
    state: RwLock<InMemoryState>,
    calls: RwLock<HashMap<Resource, usize>>,
    failing: RwLock<HashSet<Resource>>,
    /// Replaces the serialized metadata body when set
    metadata_override: RwLock<Option<String>>,
    gate: RwLock<Option<Arc<Semaphore>>>,
    /// Holds snapshot reads after their value was taken
    response_gate: RwLock<Option<Arc<Semaphore>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(InMemoryState::default()),
            calls: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            metadata_override: RwLock::new(None),
            gate: RwLock::new(None),
            response_gate: RwLock::new(None),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut InMemoryState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set_files(&self, files: Vec<FileRecord>) {
        self.with_state(|s| s.files = files);
    }

    pub fn set_metadata(&self, metadata: Metadata) {
        self.with_state(|s| s.metadata = metadata);
    }

    /// Serve this exact body from the metadata endpoint.
    pub fn set_metadata_raw(&self, raw: impl Into<String>) {
        *self
            .metadata_override
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(raw.into());
    }

    pub fn clear_metadata_raw(&self) {
        *self
            .metadata_override
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn set_folders(&self, folders: Vec<FolderRecord>) {
        self.with_state(|s| s.folders = folders);
    }

    pub fn set_edges(&self, edges: Vec<EdgeRecord>) {
        self.with_state(|s| s.edges = edges);
    }

    pub fn push_output(&self, message: OutputMessage) {
        self.with_state(|s| s.output.messages.push(message));
    }

    pub fn clear_output(&self) {
        self.with_state(|s| s.output.messages.clear());
    }

    pub fn set_projects(&self, projects: Vec<ProjectSummary>) {
        self.with_state(|s| s.projects = projects);
    }

    /// Chunks returned by the next `execute_stream` calls.
    pub fn set_command_stream(&self, chunks: Vec<Result<Vec<u8>>>) {
        self.with_state(|s| s.command_stream = chunks);
    }

    /// Commands received by `execute_stream`, oldest first.
    pub fn executed_commands(&self) -> Vec<String> {
        self.with_state(|s| s.executed.clone())
    }

    /// Make every call to `resource` fail with a transport error.
    pub fn fail(&self, resource: Resource) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource);
    }

    pub fn recover(&self, resource: Resource) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resource);
    }

    /// Number of calls made to `resource` so far.
    pub fn calls(&self, resource: Resource) -> usize {
        self.calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }

    /// Hold all subsequent fetches until the returned gate is released.
    pub fn hold_fetches(&self) -> FetchGate {
        let permits = Arc::new(Semaphore::new(0));
        *self.gate.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&permits));
        FetchGate { permits }
    }

    /// Hold snapshot reads (files, metadata, folders, edges) after they have
    /// read their value, until the returned gate is released.
    ///
    /// Models a slow response: whatever it carries is stale by the time it
    /// arrives.
    pub fn hold_responses(&self) -> FetchGate {
        let permits = Arc::new(Semaphore::new(0));
        *self
            .response_gate
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&permits));
        FetchGate { permits }
    }

    async fn respond<T>(&self, value: T) -> Result<T> {
        let gate = self
            .response_gate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
        }
        Ok(value)
    }

    /// Count the call, wait on the gate, then apply failure injection.
    async fn enter(&self, resource: Resource) -> Result<()> {
        *self
            .calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(resource)
            .or_insert(0) += 1;

        let gate = self
            .gate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
        }

        let failing = self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&resource);
        if failing {
            return Err(BackendError::Transport(format!(
                "{:?} endpoint unavailable",
                resource
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn files(&self) -> Result<Vec<FileRecord>> {
        self.enter(Resource::Files).await?;
        let files = self.with_state(|s| s.files.clone());
        self.respond(files).await
    }

    async fn metadata_raw(&self) -> Result<String> {
        self.enter(Resource::Metadata).await?;
        let raw = self
            .metadata_override
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let raw = match raw {
            Some(raw) => raw,
            None => self.with_state(|s| {
                serde_json::to_string(&s.metadata).map_err(|e| BackendError::Decode(e.to_string()))
            })?,
        };
        self.respond(raw).await
    }

    async fn folders(&self) -> Result<Vec<FolderRecord>> {
        self.enter(Resource::Folders).await?;
        let folders = self.with_state(|s| s.folders.clone());
        self.respond(folders).await
    }

    async fn edges(&self) -> Result<Vec<EdgeRecord>> {
        self.enter(Resource::Edges).await?;
        let edges = self.with_state(|s| s.edges.clone());
        self.respond(edges).await
    }

    async fn output(&self) -> Result<OutputLog> {
        self.enter(Resource::Output).await?;
        Ok(self.with_state(|s| s.output.clone()))
    }

    async fn projects(&self) -> Result<Vec<ProjectSummary>> {
        self.enter(Resource::Projects).await?;
        Ok(self.with_state(|s| s.projects.clone()))
    }

    async fn create_project(
        &self,
        name: &str,
        _body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.enter(Resource::Projects).await?;
        self.with_state(|s| {
            if s.projects.iter().any(|p| p.name == name) {
                return Err(BackendError::Status {
                    status: 400,
                    detail: format!("Project '{}' already exists", name),
                });
            }
            s.projects.push(ProjectSummary {
                name: name.to_string(),
                path: None,
            });
            Ok(serde_json::json!({
                "message": "Project created successfully",
                "project": name,
            }))
        })
    }

    async fn create_file(&self, file: &FileCreate) -> Result<FileRecord> {
        self.enter(Resource::Files).await?;
        self.with_state(|s| {
            if s
                .files
                .iter()
                .any(|f| f.file_path.as_deref() == Some(file.file_path.as_str()))
            {
                return Err(BackendError::Status {
                    status: 400,
                    detail: format!("File with name '{}' already exists", file.file_path),
                });
            }

            let id = (s.files.len() + 1).to_string();
            let label = file
                .file_path
                .rsplit('/')
                .next()
                .unwrap_or(&file.file_path)
                .to_string();
            let record = FileRecord {
                id: id.clone(),
                kind: "file".to_string(),
                label,
                x: 100.0,
                y: 100.0,
                status: "idle".to_string(),
                file_path: Some(file.file_path.clone()),
                file_type: Some(file.file_type.clone()),
                content: Some(file.content.clone()),
                is_expanded: false,
                is_modified: false,
                parent_folder: None,
            };
            s.files.push(record.clone());
            s.metadata.insert(
                id.clone(),
                NodeMetadata {
                    id: Some(id),
                    kind: Some("file".to_string()),
                    description: Some(file.description.clone()),
                    file_name: Some(file.file_path.clone()),
                    x: Some(record.x),
                    y: Some(record.y),
                    ..NodeMetadata::default()
                },
            );
            Ok(record)
        })
    }

    async fn update_description(&self, node_id: &str, description: &str) -> Result<()> {
        self.enter(Resource::Metadata).await?;
        self.with_state(|s| match s.metadata.get_mut(node_id) {
            Some(entry) => {
                entry.description = Some(description.to_string());
                Ok(())
            }
            None => Err(BackendError::Status {
                status: 404,
                detail: "File not found".to_string(),
            }),
        })
    }

    async fn execute_stream(&self, command: &str) -> Result<ByteStream> {
        self.enter(Resource::Terminal).await?;
        let chunks = self.with_state(|s| {
            s.executed.push(command.to_string());
            s.command_stream.clone()
        });
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

// Implement Backend for Arc<T> where T: Backend
// This allows sharing one backend between pollers and the console
#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn files(&self) -> Result<Vec<FileRecord>> {
        (**self).files().await
    }

    async fn metadata_raw(&self) -> Result<String> {
        (**self).metadata_raw().await
    }

    async fn metadata(&self) -> Result<Metadata> {
        (**self).metadata().await
    }

    async fn folders(&self) -> Result<Vec<FolderRecord>> {
        (**self).folders().await
    }

    async fn edges(&self) -> Result<Vec<EdgeRecord>> {
        (**self).edges().await
    }

    async fn output(&self) -> Result<OutputLog> {
        (**self).output().await
    }

    async fn projects(&self) -> Result<Vec<ProjectSummary>> {
        (**self).projects().await
    }

    async fn create_project(
        &self,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        (**self).create_project(name, body).await
    }

    async fn create_file(&self, file: &FileCreate) -> Result<FileRecord> {
        (**self).create_file(file).await
    }

    async fn update_description(&self, node_id: &str, description: &str) -> Result<()> {
        (**self).update_description(node_id, description).await
    }

    async fn execute_stream(&self, command: &str) -> Result<ByteStream> {
        (**self).execute_stream(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            kind: "file".to_string(),
            label: format!("{}.py", id),
            x: 0.0,
            y: 0.0,
            status: "idle".to_string(),
            file_path: Some(format!("{}.py", id)),
            file_type: Some("python".to_string()),
            content: None,
            is_expanded: false,
            is_modified: false,
            parent_folder: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_snapshot_collects_all_resources() {
        let backend = InMemoryBackend::new();
        backend.set_files(vec![file("1"), file("2")]);
        backend.set_edges(vec![EdgeRecord {
            from: "1".into(),
            to: "2".into(),
            kind: None,
            description: None,
        }]);

        let snapshot = fetch_snapshot(&backend).await.unwrap();
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
        assert!(snapshot.metadata.is_empty());
        assert_eq!(backend.calls(Resource::Folders), 1);
    }

    #[tokio::test]
    async fn test_fetch_snapshot_fails_if_any_resource_fails() {
        let backend = InMemoryBackend::new();
        backend.set_files(vec![file("1")]);
        backend.fail(Resource::Folders);

        let err = fetch_snapshot(&backend).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[tokio::test]
    async fn test_malformed_metadata_is_decode_error() {
        let backend = InMemoryBackend::new();
        backend.set_metadata_raw("{\"1\": {\"description\": ");

        let err = backend.metadata().await.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
        // Raw form is still available
        assert!(backend.metadata_raw().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_file_rejects_duplicate_path() {
        let backend = InMemoryBackend::new();
        let create = FileCreate {
            file_path: "main.py".into(),
            file_type: "python".into(),
            content: String::new(),
            description: "entry point".into(),
        };

        let created = backend.create_file(&create).await.unwrap();
        assert_eq!(created.label, "main.py");
        assert_eq!(
            backend.metadata().await.unwrap()[&created.id].description.as_deref(),
            Some("entry point")
        );

        let err = backend.create_file(&create).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_recover_clears_failure() {
        let backend = InMemoryBackend::new();
        backend.fail(Resource::Edges);
        assert!(backend.edges().await.is_err());
        backend.recover(Resource::Edges);
        assert!(backend.edges().await.is_ok());
        assert_eq!(backend.calls(Resource::Edges), 2);
    }
}
