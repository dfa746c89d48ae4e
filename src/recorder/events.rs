//! Recording notifications
//!
//! Observers either hold a broadcast receiver or register a callback and keep
//! the returned [`Subscription`]; dropping it unregisters the callback.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::state::RecordingState;

/// Events emitted by the session controller
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// New state snapshot after any transition or duration tick
    StateChanged(RecordingState),
    /// A session failed
    Error { code: String, message: String },
}

/// Broadcast hub for [`RecordingEvent`]s
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<RecordingEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: RecordingEvent) {
        // No observers is fine
        let _ = self.tx.send(event);
    }

    /// Call `callback` for every event until the subscription is dropped
    pub fn on_event<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(RecordingEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Event observer lagged, {} events skipped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { handle }
    }

    pub fn on_state_changed<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(RecordingState) + Send + 'static,
    {
        self.on_event(move |event| {
            if let RecordingEvent::StateChanged(state) = event {
                callback(state);
            }
        })
    }

    pub fn on_error<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(String, String) + Send + 'static,
    {
        self.on_event(move |event| {
            if let RecordingEvent::Error { code, message } = event {
                callback(code, message);
            }
        })
    }
}

/// Registered observer; unregisters on drop
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_dropping_subscription_stops_callbacks() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = hub.on_state_changed(move |state| sink.lock().unwrap().push(state.duration));

        let mut probe = hub.subscribe();
        hub.emit(RecordingEvent::StateChanged(RecordingState {
            duration: 1,
            ..Default::default()
        }));
        probe.recv().await.unwrap();
        tokio::task::yield_now().await;

        subscription.unsubscribe();
        hub.emit(RecordingEvent::StateChanged(RecordingState {
            duration: 2,
            ..Default::default()
        }));
        probe.recv().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_error_callback_ignores_state_events() {
        let hub = EventHub::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _subscription = hub.on_error(move |code, _| {
            let _ = tx.send(code);
        });

        hub.emit(RecordingEvent::StateChanged(RecordingState::default()));
        hub.emit(RecordingEvent::Error {
            code: "EMPTY_RECORDING".into(),
            message: "Recording file is empty".into(),
        });

        assert_eq!(rx.recv().await.unwrap(), "EMPTY_RECORDING");
    }
}
