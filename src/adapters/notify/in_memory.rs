//! Broadcast-based subscription change notifier.
//!
//! Publishes the user id of every changed subscription on a tokio
//! broadcast channel. The view cache subscribes and invalidates the
//! matching entry. Delivery is best effort: with no subscribers, or a
//! full channel, the notification is dropped and the cache falls back
//! to its normal miss path.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::foundation::UserId;
use crate::ports::SubscriptionNotifier;

pub struct InMemorySubscriptionNotifier {
    sender: broadcast::Sender<String>,
}

impl InMemorySubscriptionNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// New receiver for this notifier's channel.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for InMemorySubscriptionNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl SubscriptionNotifier for InMemorySubscriptionNotifier {
    async fn notify(&self, user_id: &UserId) {
        if let Err(e) = self.sender.send(user_id.as_str().to_string()) {
            // No receivers; nothing is listening yet
            tracing::debug!(user_id = %user_id, error = %e, "subscription notification dropped");
        }
    }
}
