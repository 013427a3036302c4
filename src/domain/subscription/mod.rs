//! Subscription domain: plans, the per-user record, transition rules,
//! and webhook event handling.

mod errors;
mod plan;
mod record;
mod status;
mod stripe_event;
mod transition;
mod webhook_errors;
mod webhook_processor;
mod webhook_verifier;

pub use errors::SubscriptionError;
pub use plan::{PlanCatalog, PlanType};
pub use record::{ProviderSnapshot, SubscriptionRecord};
pub use status::SubscriptionStatus;
pub use stripe_event::{StripeEvent, StripeEventData, StripeEventType};
pub use transition::{decide, TransitionDecision};
pub use webhook_errors::WebhookError;
pub use webhook_processor::{IdempotentWebhookProcessor, WebhookEventHandler};
pub use webhook_verifier::{SignatureHeader, StripeWebhookVerifier};

#[cfg(test)]
pub use stripe_event::StripeEventBuilder;
