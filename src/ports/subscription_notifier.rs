//! Subscription change notification port.

use async_trait::async_trait;

use crate::domain::foundation::UserId;

/// Push signal that a user's subscription state changed.
///
/// Every mutating handler fires this after a successful write; the view
/// cache subscribes and invalidates its entry so the next read refetches.
/// Delivery is best-effort: a lost notification only delays a refresh.
#[async_trait]
pub trait SubscriptionNotifier: Send + Sync {
    async fn notify(&self, user_id: &UserId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _takes_dyn(_notifier: &dyn SubscriptionNotifier) {}
    }
}
