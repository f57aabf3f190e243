//! nody-core: client-side synchronization for the Nody node canvas.
//!
//! This crate provides:
//! - The `Backend` trait over the canvas REST API, plus an in-memory double
//! - Gated canvas state with referentially stable slices
//! - A refresh hook and a periodic poller with overlap suppression
//! - Streamed terminal command decoding and history
//! - Node form validation and project helpers

pub mod backend;
pub mod console;
pub mod events;
pub mod form;
pub mod output;
pub mod poller;
pub mod projects;
pub mod records;
pub mod state;
pub mod stream;
pub mod sync;

pub use backend::{fetch_snapshot, Backend, BackendError, ByteStream, InMemoryBackend, Resource};
pub use console::{CommandEntry, CommandHistory, CommandStatus, Console};
pub use events::{CanvasEvent, EventBus, Subscription};
pub use form::{detect_file_type, ensure_extension, FormError, NodeConfig, NodeForm, NodeFormInit, NodeKind};
pub use output::OutputTail;
pub use poller::{CanvasPoller, PollOutcome, PollerHandle, DEFAULT_POLL_INTERVAL};
pub use projects::{create_project, list_projects, ProjectResponse};
pub use records::{
    CanvasSnapshot, EdgeRecord, FileCreate, FileRecord, FolderRecord, Metadata, NodeMetadata,
    OutputLevel, OutputLog, OutputMessage, ProjectSummary,
};
pub use state::{CanvasState, SliceChanges};
pub use stream::{EventDecoder, StreamEvent};
pub use sync::{RefreshLoop, RefreshOutcome, SyncHook};
