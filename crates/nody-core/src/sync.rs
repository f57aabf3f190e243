//! Refresh of canvas state, on demand or on a timer.
//!
//! `SyncHook` is the general-purpose counterpart of `CanvasPoller`: callers
//! invoke `refresh()` whenever they want fresh data (or `spawn` it on an
//! interval), and concurrent calls collapse into the one already in flight.
//! Unlike the poller it replaces every slice on success, with no content gate.

use crate::backend::{fetch_snapshot, Backend, Result};
use crate::events::{CanvasEvent, EventBus};
use crate::state::{CanvasState, SliceChanges};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of a `refresh()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A refresh was already in flight; nothing was requested.
    Skipped,
    /// The snapshot was fetched and applied.
    Applied(SliceChanges),
}

/// Clears the in-flight flag when dropped, whatever the cycle's outcome,
/// then wakes anyone waiting for the cycle to end.
pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
    finished: Option<&'a Notify>,
}

impl<'a> InFlight<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag,
                finished: None,
            })
    }

    fn notify_on_release(mut self, finished: &'a Notify) -> Self {
        self.finished = Some(finished);
        self
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        if let Some(finished) = self.finished {
            finished.notify_waiters();
        }
    }
}

pub struct SyncHook<B: Backend> {
    backend: B,
    state: Mutex<CanvasState>,
    in_flight: AtomicBool,
    /// Signalled whenever an outstanding refresh ends
    refresh_finished: Notify,
    events: Arc<EventBus>,
}

impl<B: Backend> SyncHook<B> {
    pub fn new(backend: B, events: Arc<EventBus>) -> Self {
        Self {
            backend,
            state: Mutex::new(CanvasState::new()),
            in_flight: AtomicBool::new(false),
            refresh_finished: Notify::new(),
            events,
        }
    }

    /// A cheap copy of the held state.
    pub fn state(&self) -> CanvasState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Fetch all four resources and replace the held slices.
    ///
    /// Returns `Skipped` without touching the network if another refresh is
    /// outstanding. On error nothing is applied.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = InFlight::acquire(&self.in_flight)
            .map(|guard| guard.notify_on_release(&self.refresh_finished))
        else {
            debug!("Refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let snapshot = fetch_snapshot(&self.backend).await.inspect_err(|e| {
            warn!("Refresh failed: {}", e);
        })?;

        // Observers run outside the lock so they may read the state back.
        let (changes, current) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let changes = state.replace_all(snapshot);
            (changes, state.clone())
        };
        current.emit_changes(&self.events, changes);
        Ok(RefreshOutcome::Applied(changes))
    }

    /// Update a node's description on the backend, mirror it locally, then
    /// refresh to reconcile with whatever the backend now holds.
    ///
    /// The local edit happens only after the backend accepted the update. If
    /// a refresh is already outstanding its snapshot may predate the update,
    /// so this waits for it to finish and then refreshes again.
    pub async fn update_description(&self, node_id: &str, description: &str) -> Result<()> {
        self.backend.update_description(node_id, description).await?;

        let edited = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .set_description(node_id, description)
                .then(|| state.metadata().len())
        };
        if let Some(count) = edited {
            self.events.emit(CanvasEvent::MetadataChanged { count });
        }

        self.reconcile().await
    }

    /// Run a refresh that starts after this call, waiting out any refresh
    /// already in flight.
    async fn reconcile(&self) -> Result<()> {
        loop {
            // Created before trying, so the end of the outstanding refresh
            // cannot slip between the attempt and the wait.
            let finished = self.refresh_finished.notified();
            match self.refresh().await? {
                RefreshOutcome::Applied(_) => return Ok(()),
                RefreshOutcome::Skipped => {
                    debug!("Waiting for outstanding refresh before reconciling");
                    finished.await;
                }
            }
        }
    }
}

impl<B: Backend + 'static> SyncHook<B> {
    /// Refresh every `interval` until the returned handle is dropped.
    ///
    /// Failures are logged and the next tick tries again.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> RefreshLoop {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Refresh loop started ({:?} interval)", interval);

            loop {
                ticker.tick().await;
                // Already logged by refresh()
                let _ = self.refresh().await;
            }
        });
        RefreshLoop { task }
    }
}

/// Owns a running refresh loop. Dropping it stops the loop.
pub struct RefreshLoop {
    task: JoinHandle<()>,
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}
