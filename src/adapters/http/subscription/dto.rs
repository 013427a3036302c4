//! Request and response types for the subscription endpoints.

use serde::{Deserialize, Serialize};

use crate::application::handlers::subscription::{CancellationOutcome, TransitionOutcome};
use crate::application::SubscriptionView;

/// Body for `POST /api/subscription/checkout`.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub price_id: String,
}

/// Response for `GET /api/subscription` and `POST /api/subscription/trial`.
#[derive(Debug, Serialize)]
pub struct SubscriptionViewResponse {
    pub plan: String,
    pub status: String,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub can_downgrade: bool,
    pub downgrade_available_at: Option<String>,
    pub is_in_trial_period: bool,
    pub has_premium_access: bool,
}

impl From<SubscriptionView> for SubscriptionViewResponse {
    fn from(view: SubscriptionView) -> Self {
        Self {
            plan: view.plan.as_str().to_string(),
            status: view.status.as_str().to_string(),
            current_period_end: view.current_period_end.map(|t| t.to_rfc3339()),
            cancel_at_period_end: view.cancel_at_period_end,
            can_downgrade: view.can_downgrade,
            downgrade_available_at: view.downgrade_available_at.map(|t| t.to_rfc3339()),
            is_in_trial_period: view.is_in_trial_period,
            has_premium_access: view.has_premium_access,
        }
    }
}

/// Response for `POST /api/subscription/checkout`.
///
/// Either a hosted checkout URL to redirect to, or the plan the
/// subscription now holds when the change happened in place.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TransitionResponse {
    Checkout { url: String },
    Updated { updated: String },
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        match outcome {
            TransitionOutcome::CheckoutCreated { url } => TransitionResponse::Checkout { url },
            TransitionOutcome::PlanUpdated { plan }
            | TransitionOutcome::AlreadyOnPlan { plan } => TransitionResponse::Updated {
                updated: plan.as_str().to_string(),
            },
        }
    }
}

/// Response for `POST /api/subscription/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,
}

impl From<CancellationOutcome> for CancelResponse {
    fn from(outcome: CancellationOutcome) -> Self {
        match outcome {
            CancellationOutcome::ScheduledAtPeriodEnd {
                period_end,
                message,
            } => Self {
                status: "scheduled".to_string(),
                message,
                period_end: period_end.map(|t| t.to_rfc3339()),
            },
            CancellationOutcome::CanceledImmediately { message } => Self {
                status: "canceled".to_string(),
                message,
                period_end: None,
            },
            CancellationOutcome::AlreadyInactive { message } => Self {
                status: "inactive".to_string(),
                message,
                period_end: None,
            },
        }
    }
}

/// Error body: `{ "error": message, "code": CODE, ...extras }`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_used_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_available_at: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trial_used_at: None,
            downgrade_available_at: None,
        }
    }
}
