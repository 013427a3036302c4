//! PostgreSQL adapters for the repository ports.

pub mod profile_repository;
pub mod subscription_repository;
pub mod webhook_event_repository;

pub use profile_repository::PostgresProfileRepository;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use webhook_event_repository::PostgresWebhookEventRepository;
