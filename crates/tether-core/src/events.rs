//! Status event dispatch.
//!
//! One-way fan-out from the supervisor to any number of observers over a
//! tokio broadcast channel. Emitting never blocks and never fails: with no
//! receivers attached, events are simply dropped.

use tether_types::StatusEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast capacity. Slow receivers past this lag and skip.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Receiver half for status observers.
pub type StatusReceiver = broadcast::Receiver<StatusEvent>;

/// Fan-out point for [`StatusEvent`]s.
#[derive(Debug, Clone)]
pub struct StatusDispatcher {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl StatusDispatcher {
    /// Create a dispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future status events.
    pub fn subscribe(&self) -> StatusReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: StatusEvent) {
        trace!(state = %event.state, message = %event.message, "status");
        // An Err here only means nobody is listening right now.
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::ConnectionState;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let dispatcher = StatusDispatcher::default();
        let mut rx = dispatcher.subscribe();

        dispatcher.emit(StatusEvent::now(ConnectionState::Connecting, "Connecting to AA:BB"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.state, ConnectionState::Connecting);
        assert_eq!(event.message, "Connecting to AA:BB");
    }

    #[tokio::test]
    async fn test_emit_without_receivers_is_silent() {
        let dispatcher = StatusDispatcher::default();
        assert_eq!(dispatcher.receiver_count(), 0);
        dispatcher.emit(StatusEvent::now(ConnectionState::Idle, "nobody home"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_events() {
        let dispatcher = StatusDispatcher::default();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.emit(StatusEvent::now(ConnectionState::Active, "Connected to AA:BB"));

        assert_eq!(a.recv().await.unwrap().message, "Connected to AA:BB");
        assert_eq!(b.recv().await.unwrap().message, "Connected to AA:BB");
    }
}
