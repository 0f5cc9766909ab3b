//! Outbound notifications
//!
//! Signals are topic strings with no payload, delivered at least once.
//! A receiver re-reads shared storage to learn what changed.

use tokio::sync::broadcast;

/// Best-effort outbound signal; implementations log delivery problems
pub trait Notifier: Send + Sync {
    fn post(&self, topic: &str);
}

/// In-process notifier over a tokio broadcast channel
pub struct BroadcastNotifier {
    tx: broadcast::Sender<String>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Notifier for BroadcastNotifier {
    fn post(&self, topic: &str) {
        // No subscribers is not an error; nobody is waiting
        if self.tx.send(topic.to_string()).is_err() {
            tracing::debug!("No subscribers for {}", topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_receive_topics() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();

        notifier.post("screenchunk.chunkSaved");
        notifier.post("screenchunk.chunkSaved");

        assert_eq!(rx.try_recv().unwrap(), "screenchunk.chunkSaved");
        assert_eq!(rx.try_recv().unwrap(), "screenchunk.chunkSaved");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_post_without_subscribers_succeeds() {
        let notifier = BroadcastNotifier::new(4);
        notifier.post("topic");

        // A later subscriber does not see signals posted before it arrived
        let mut rx = notifier.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
