//! Locally held canvas state.
//!
//! Each slice lives behind an `Arc` so observers can cheaply hold on to a
//! version and compare by pointer: a slice whose content did not change keeps
//! the same allocation across poll cycles.

use crate::events::{CanvasEvent, EventBus};
use crate::records::{CanvasSnapshot, EdgeRecord, FileRecord, FolderRecord, Metadata};
use std::sync::Arc;

/// Which slices' content changed in one application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceChanges {
    pub files: bool,
    pub metadata: bool,
    pub folders: bool,
    pub edges: bool,
}

impl SliceChanges {
    pub fn any(&self) -> bool {
        self.files || self.metadata || self.folders || self.edges
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanvasState {
    files: Arc<Vec<FileRecord>>,
    metadata: Arc<Metadata>,
    folders: Arc<Vec<FolderRecord>>,
    edges: Arc<Vec<EdgeRecord>>,
}

/// Replace `slot` only if `value` differs structurally.
fn gate<T: PartialEq>(slot: &mut Arc<T>, value: T) -> bool {
    if **slot == value {
        false
    } else {
        *slot = Arc::new(value);
        true
    }
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &Arc<Vec<FileRecord>> {
        &self.files
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn folders(&self) -> &Arc<Vec<FolderRecord>> {
        &self.folders
    }

    pub fn edges(&self) -> &Arc<Vec<EdgeRecord>> {
        &self.edges
    }

    /// Apply a snapshot slice by slice, keeping the old allocation for every
    /// slice whose content is unchanged.
    ///
    /// Slices are applied in a fixed order: files, metadata, folders, edges.
    pub fn apply_gated(&mut self, snapshot: CanvasSnapshot) -> SliceChanges {
        SliceChanges {
            files: gate(&mut self.files, snapshot.files),
            metadata: gate(&mut self.metadata, snapshot.metadata),
            folders: gate(&mut self.folders, snapshot.folders),
            edges: gate(&mut self.edges, snapshot.edges),
        }
    }

    /// Replace every slice unconditionally. Changes still report content
    /// differences only.
    pub fn replace_all(&mut self, snapshot: CanvasSnapshot) -> SliceChanges {
        let changes = SliceChanges {
            files: *self.files != snapshot.files,
            metadata: *self.metadata != snapshot.metadata,
            folders: *self.folders != snapshot.folders,
            edges: *self.edges != snapshot.edges,
        };
        self.files = Arc::new(snapshot.files);
        self.metadata = Arc::new(snapshot.metadata);
        self.folders = Arc::new(snapshot.folders);
        self.edges = Arc::new(snapshot.edges);
        changes
    }

    /// Set one node's description locally. Returns false if the node has no
    /// metadata entry.
    pub fn set_description(&mut self, node_id: &str, description: &str) -> bool {
        if !self.metadata.contains_key(node_id) {
            return false;
        }
        let metadata = Arc::make_mut(&mut self.metadata);
        if let Some(entry) = metadata.get_mut(node_id) {
            entry.description = Some(description.to_string());
        }
        true
    }

    /// Publish one event per changed slice.
    pub fn emit_changes(&self, bus: &EventBus, changes: SliceChanges) {
        if changes.files {
            bus.emit(CanvasEvent::FilesChanged {
                count: self.files.len(),
            });
        }
        if changes.metadata {
            bus.emit(CanvasEvent::MetadataChanged {
                count: self.metadata.len(),
            });
        }
        if changes.folders {
            bus.emit(CanvasEvent::FoldersChanged {
                count: self.folders.len(),
            });
        }
        if changes.edges {
            bus.emit(CanvasEvent::EdgesChanged {
                count: self.edges.len(),
            });
        }
    }
}
