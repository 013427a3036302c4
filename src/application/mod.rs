//! Application layer: command handlers, the read-side view cache, and
//! background maintenance tasks.

pub mod handlers;
pub mod subscription_view;
pub mod webhook_retention;

pub use subscription_view::{SubscriptionView, SubscriptionViewCache};
pub use webhook_retention::WebhookRetentionSweep;
