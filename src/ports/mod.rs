//! Ports: async trait seams between the application core and adapters.

mod payment_provider;
mod profile_repository;
mod session_validator;
mod subscription_notifier;
mod subscription_repository;
mod webhook_event_repository;

pub use payment_provider::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentErrorCode, PaymentProvider,
    ProrationBehavior, ProviderCustomer, ProviderSubscription,
};
pub use profile_repository::ProfileRepository;
pub use session_validator::SessionValidator;
pub use subscription_notifier::SubscriptionNotifier;
pub use subscription_repository::SubscriptionRepository;
pub use webhook_event_repository::{
    SaveResult, WebhookEventRecord, WebhookEventRepository, WebhookResult,
};
