//! Subscription command handlers.

pub mod cancel_subscription;
pub mod reconcile_payment_event;
pub mod request_transition;
pub mod request_trial;

pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancellationOutcome,
};
pub use reconcile_payment_event::ReconcilePaymentEventHandler;
pub use request_transition::{
    RequestTransitionCommand, RequestTransitionHandler, TransitionOutcome,
};
pub use request_trial::{RequestTrialCommand, RequestTrialHandler};
