//! Engine events
//!
//! The display layer subscribes to an [`EventBus`] and receives
//! [`EngineEvent`]s over a channel. Events are notifications only; all
//! state is read through snapshots.

use crate::TrackId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Notification raised by the engine or the timer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A track failed to load during the preload pass; its toggle is a
    /// no-op from now on.
    LoadFailed {
        /// The failed track.
        id: TrackId,
        /// Human-readable cause.
        reason: String,
    },
    /// A countdown run reached zero; playback has been paused.
    TimerFinished,
}

/// Fan-out event channel shared by the engine and the timer.
///
/// Cloning the bus shares the subscriber list. Subscribers whose
/// receiver was dropped are pruned on the next emit.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<EngineEvent>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Register a subscriber and return its receiving end.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: EngineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_every_subscriber() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(EngineEvent::TimerFinished);
        assert_eq!(a.try_recv().unwrap(), EngineEvent::TimerFinished);
        assert_eq!(b.try_recv().unwrap(), EngineEvent::TimerFinished);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(EngineEvent::TimerFinished);
        bus.emit(EngineEvent::TimerFinished);
        assert_eq!(a.iter().take(2).count(), 2);
    }
}
