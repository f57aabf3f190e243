//! Terminal console: command history fed by streamed output.
//!
//! Each executed command appends one history entry. While its stream is
//! read, that entry (always the last one) is replaced after every event with
//! the output and error text accumulated so far.

use crate::backend::Backend;
use crate::events::{CanvasEvent, EventBus};
use crate::stream::{EventDecoder, StreamEvent};
use futures::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Output shown for a command before its first event arrives.
pub const EXECUTING_PLACEHOLDER: &str = "Executing...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEntry {
    pub id: u64,
    pub command: String,
    pub output: String,
    pub error: Option<String>,
    pub status: CommandStatus,
}

/// Ordered history; only the newest entry is ever mutated.
#[derive(Debug, Default)]
pub struct CommandHistory {
    entries: Vec<CommandEntry>,
    next_id: u64,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a running entry for `command` and return a copy of it.
    pub fn begin(&mut self, command: &str) -> CommandEntry {
        let entry = CommandEntry {
            id: self.next_id,
            command: command.to_string(),
            output: EXECUTING_PLACEHOLDER.to_string(),
            error: None,
            status: CommandStatus::Running,
        };
        self.next_id += 1;
        self.entries.push(entry.clone());
        entry
    }

    /// Replace the last entry if it still has `entry.id`.
    ///
    /// Returns false when a newer command has been appended since; the
    /// caller's entry is then frozen.
    pub fn replace_last(&mut self, entry: CommandEntry) -> bool {
        match self.entries.last_mut() {
            Some(last) if last.id == entry.id => {
                *last = entry;
                true
            }
            _ => false,
        }
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&CommandEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulated text of one running command.
#[derive(Debug)]
struct CommandRun {
    entry: CommandEntry,
    output: String,
    error: String,
}

impl CommandRun {
    fn new(entry: CommandEntry) -> Self {
        Self {
            entry,
            output: String::new(),
            error: String::new(),
        }
    }

    /// Fold one event in. Returns true once the stream signalled completion.
    fn apply(&mut self, event: StreamEvent) -> bool {
        if let Some(fragment) = event.output {
            self.output.push_str(&fragment);
        }
        if let Some(fragment) = event.error {
            self.error.push_str(&fragment);
        }
        self.entry.output = self.output.clone();
        self.entry.error = (!self.error.is_empty()).then(|| self.error.clone());
        if event.done {
            self.entry.status = CommandStatus::Completed;
        }
        event.done
    }
}

pub struct Console<B: Backend> {
    backend: B,
    history: Mutex<CommandHistory>,
    events: Arc<EventBus>,
}

impl<B: Backend> Console<B> {
    pub fn new(backend: B, events: Arc<EventBus>) -> Self {
        Self {
            backend,
            history: Mutex::new(CommandHistory::new()),
            events,
        }
    }

    /// Copy of the full history.
    pub fn history(&self) -> Vec<CommandEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries()
            .to_vec()
    }

    /// Write `entry` over the last history slot and notify observers.
    fn publish(&self, entry: &CommandEntry) -> bool {
        let replaced = self
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace_last(entry.clone());
        if replaced {
            self.events.emit(CanvasEvent::CommandUpdated {
                entry: entry.clone(),
            });
        } else {
            debug!("Command {} superseded, dropping update", entry.id);
        }
        replaced
    }

    /// Mark `entry` failed. Stderr already streamed for it is kept and the
    /// failure is appended on its own line.
    fn fail(&self, mut entry: CommandEntry, message: String) -> CommandEntry {
        warn!("Command '{}' failed: {}", entry.command, message);
        entry.status = CommandStatus::Failed;
        let mut error = entry.error.take().unwrap_or_default();
        if !error.is_empty() && !error.ends_with('\n') {
            error.push('\n');
        }
        error.push_str("Error: ");
        error.push_str(&message);
        entry.error = Some(error);
        self.publish(&entry);
        entry
    }

    /// Execute `command` and stream its output into the history.
    ///
    /// Blank input is ignored and returns `None`. Otherwise returns the final
    /// state of the command's entry. No retry is attempted.
    pub async fn execute(&self, command: &str) -> Option<CommandEntry> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }

        let entry = self
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .begin(command);
        self.events.emit(CanvasEvent::CommandUpdated {
            entry: entry.clone(),
        });
        info!("Executing command: {}", command);

        let mut stream = match self.backend.execute_stream(command).await {
            Ok(stream) => stream,
            Err(e) => return Some(self.fail(entry, e.to_string())),
        };

        let mut run = CommandRun::new(entry);
        let mut decoder = EventDecoder::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Some(self.fail(run.entry, e.to_string())),
            };

            for event in decoder.push(&chunk) {
                let done = run.apply(event);
                if !self.publish(&run.entry) {
                    return Some(run.entry);
                }
                if done {
                    return Some(run.entry);
                }
            }
        }

        if let Some(event) = decoder.finish() {
            if run.apply(event) {
                self.publish(&run.entry);
                return Some(run.entry);
            }
        }

        // Stream ended without an explicit completion flag
        if run.entry.status == CommandStatus::Running {
            run.entry.status = CommandStatus::Completed;
            if run.entry.output == EXECUTING_PLACEHOLDER {
                run.entry.output.clear();
            }
            self.publish(&run.entry);
        }
        Some(run.entry)
    }
}
