//! Fixed-interval canvas poller.
//!
//! Every tick fetches files, metadata, folders and edges together and applies
//! each slice only if its content changed, so observers are notified (and
//! re-derive the graph) only when something actually differs. Failures are
//! reported and the next tick tries again.

use crate::backend::{fetch_snapshot, Backend};
use crate::events::{CanvasEvent, EventBus};
use crate::state::{CanvasState, SliceChanges};
use crate::sync::InFlight;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default canvas polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The snapshot was applied; lists which slices changed.
    Applied(SliceChanges),
    /// A fetch failed; state is untouched.
    Failed,
    /// The poller was stopped while the fetch was in flight.
    Discarded,
    /// Another cycle was still outstanding; nothing was requested.
    Skipped,
}

pub struct CanvasPoller<B: Backend> {
    backend: B,
    state: Mutex<CanvasState>,
    /// Cleared on shutdown; late responses are dropped once this is false
    alive: AtomicBool,
    in_flight: AtomicBool,
    events: Arc<EventBus>,
}

impl<B: Backend + 'static> CanvasPoller<B> {
    pub fn new(backend: B, events: Arc<EventBus>) -> Self {
        Self {
            backend,
            state: Mutex::new(CanvasState::new()),
            alive: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    /// A cheap copy of the held state.
    pub fn state(&self) -> CanvasState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Stop accepting results. Responses still in flight are discarded.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one poll cycle.
    ///
    /// Returns `Skipped` without touching the network while an earlier cycle
    /// is still outstanding.
    pub async fn poll_once(&self) -> PollOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("Poll already in flight, skipping");
            return PollOutcome::Skipped;
        };

        let result = fetch_snapshot(&self.backend).await;

        if !self.is_alive() {
            debug!("Poller stopped, discarding response");
            return PollOutcome::Discarded;
        }

        match result {
            Ok(snapshot) => {
                let (changes, current) = {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    let changes = state.apply_gated(snapshot);
                    (changes, state.clone())
                };
                if changes.any() {
                    debug!("Canvas changed: {:?}", changes);
                }
                current.emit_changes(&self.events, changes);
                PollOutcome::Applied(changes)
            }
            Err(e) => {
                warn!("Failed to poll canvas: {}", e);
                self.events.emit(CanvasEvent::PollFailed {
                    message: format!("Failed to load canvas data: {}", e),
                });
                PollOutcome::Failed
            }
        }
    }

    /// Poll on a fixed interval until the returned handle is shut down.
    ///
    /// Ticks that come due while a cycle is still running are skipped, so at
    /// most one request set is outstanding at a time.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PollerHandle<B> {
        let poller = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Canvas poller started ({:?} interval)", interval);

            while poller.is_alive() {
                ticker.tick().await;
                if !poller.is_alive() {
                    break;
                }
                poller.poll_once().await;
            }

            debug!("Canvas poller loop exited");
        });

        PollerHandle {
            poller: self,
            task: Some(task),
        }
    }
}

/// Owns a running poll loop. Dropping it stops the loop.
pub struct PollerHandle<B: Backend> {
    poller: Arc<CanvasPoller<B>>,
    task: Option<JoinHandle<()>>,
}

impl<B: Backend> PollerHandle<B> {
    pub fn poller(&self) -> &Arc<CanvasPoller<B>> {
        &self.poller
    }

    /// Stop the loop and mark the poller dead.
    pub fn shutdown(&mut self) {
        self.poller.alive.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<B: Backend> Drop for PollerHandle<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
