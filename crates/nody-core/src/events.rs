//! Change propagation for canvas observers.
//!
//! Views that re-derive the node graph listen for `CanvasEvent`s on an
//! `EventBus`. Listeners are plain closures registered for as long as their
//! `Subscription` lives.

use crate::console::CommandEntry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted when held canvas state changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CanvasEvent {
    /// The file slice was replaced with different content.
    FilesChanged {
        /// Number of files now held.
        count: usize,
    },
    /// The metadata slice was replaced or optimistically edited.
    MetadataChanged {
        /// Number of metadata entries now held.
        count: usize,
    },
    /// The folder slice was replaced with different content.
    FoldersChanged { count: usize },
    /// The edge slice was replaced with different content.
    EdgesChanged { count: usize },
    /// A poll cycle failed; held state is unchanged.
    PollFailed {
        /// Human-readable reason, suitable for a toast.
        message: String,
    },
    /// The running command's history entry was updated.
    CommandUpdated { entry: CommandEntry },
}

type Listener = Arc<dyn Fn(CanvasEvent) + Send + Sync>;

/// Keeps one listener registered on an `EventBus`.
///
/// Dropping it removes the listener. A handle outliving its bus is inert.
#[must_use = "the listener is removed as soon as the subscription is dropped"]
pub struct Subscription {
    bus: Weak<EventBus>,
    key: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.key);
        }
    }
}

/// Fan-out of canvas events to registered listeners, in registration order.
///
/// Share it as `Arc<EventBus>`; subscribing needs the `Arc`.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<BTreeMap<u64, Listener>>,
    next_key: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(CanvasEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            key,
        }
    }

    fn remove(&self, key: u64) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// No lock is held while listeners run, so they may subscribe or drop
    /// subscriptions themselves.
    pub fn emit(&self, event: CanvasEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for listener in listeners {
            listener(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_every_listener_sees_each_event() {
        let bus = Arc::new(EventBus::new());
        let toasts = Arc::new(Mutex::new(Vec::new()));
        let graph_rebuilds = Arc::new(Mutex::new(0));

        let _toast = bus.subscribe({
            let toasts = Arc::clone(&toasts);
            move |event| {
                if let CanvasEvent::PollFailed { message } = event {
                    toasts.lock().unwrap().push(message);
                }
            }
        });
        let _graph = bus.subscribe({
            let graph_rebuilds = Arc::clone(&graph_rebuilds);
            move |_| *graph_rebuilds.lock().unwrap() += 1
        });

        bus.emit(CanvasEvent::FilesChanged { count: 3 });
        bus.emit(CanvasEvent::PollFailed {
            message: "timeout".into(),
        });

        assert_eq!(*toasts.lock().unwrap(), vec!["timeout".to_string()]);
        assert_eq!(*graph_rebuilds.lock().unwrap(), 2);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let counts = Arc::new(Mutex::new(Vec::new()));

        let subscription = bus.subscribe({
            let counts = Arc::clone(&counts);
            move |event| {
                if let CanvasEvent::MetadataChanged { count } = event {
                    counts.lock().unwrap().push(count);
                }
            }
        });
        bus.emit(CanvasEvent::MetadataChanged { count: 1 });
        drop(subscription);
        bus.emit(CanvasEvent::MetadataChanged { count: 2 });

        assert_eq!(*counts.lock().unwrap(), vec![1]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_bus_is_inert() {
        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe(|_| {});
        drop(bus);
        drop(subscription);
    }

    #[test]
    fn test_events_delivered_in_order() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = bus.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event);
        });

        bus.emit(CanvasEvent::FilesChanged { count: 1 });
        bus.emit(CanvasEvent::EdgesChanged { count: 0 });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                CanvasEvent::FilesChanged { count: 1 },
                CanvasEvent::EdgesChanged { count: 0 },
            ]
        );
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        let nested = Arc::new(Mutex::new(Vec::new()));
        let nested_clone = Arc::clone(&nested);

        let _sub = bus.subscribe(move |_| {
            let sub = inner_bus.subscribe(|_| {});
            nested_clone.lock().unwrap().push(sub);
        });

        bus.emit(CanvasEvent::FoldersChanged { count: 0 });
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_canvas_event_serialization() {
        let event = CanvasEvent::PollFailed {
            message: "backend unreachable".into(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"pollFailed\""));
        assert!(json.contains("\"message\":\"backend unreachable\""));
    }
}
