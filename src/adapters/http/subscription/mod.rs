//! HTTP surface for subscriptions.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::SubscriptionAppState;
pub use routes::{api_router, subscription_routes, webhook_routes};
