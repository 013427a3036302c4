//! Notification adapters for the `SubscriptionNotifier` port.

pub mod in_memory;

pub use in_memory::InMemorySubscriptionNotifier;
