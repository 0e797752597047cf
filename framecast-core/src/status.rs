//! Human-readable status events for UI feedback.
//!
//! Each stateful component ([`crate::sender::FrameSender`],
//! [`crate::hub::FrameHub`]) owns one `StatusChannel` and emits short
//! strings on lifecycle changes ("connected", "connection lost", …).
//! The strings are informational, not a machine-parseable contract;
//! operator-facing diagnostics go through `tracing` instead.

use tokio::sync::broadcast;

/// Default backlog per status subscriber.
const STATUS_CAPACITY: usize = 32;

/// A per-component stream of human-readable status events.
///
/// Cloning shares the underlying channel. Subscribing after events
/// have been emitted never replays them; a subscriber that falls more
/// than the backlog behind loses the oldest events.
#[derive(Debug, Clone)]
pub struct StatusChannel {
    tx: broadcast::Sender<String>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future status events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Emit one status event. A send with no live subscribers is fine.
    pub fn emit(&self, msg: impl Into<String>) {
        let _ = self.tx.send(msg.into());
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let status = StatusChannel::new();
        let mut rx = status.subscribe();

        status.emit("connected");
        status.emit(format!("attempt {}", 2));

        assert_eq!(rx.recv().await.unwrap(), "connected");
        assert_eq!(rx.recv().await.unwrap(), "attempt 2");
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_future_events() {
        let status = StatusChannel::new();
        status.emit("before");

        let mut rx = status.subscribe();
        status.emit("after");
        assert_eq!(rx.recv().await.unwrap(), "after");
    }

    #[test]
    fn emit_without_subscribers_is_ok() {
        let status = StatusChannel::new();
        status.emit("nobody listening");
    }
}
