//! Subscription domain errors.

use std::fmt;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, ValidationError};

use super::plan::PlanType;

/// Errors produced by subscription operations.
#[derive(Debug, Clone)]
pub enum SubscriptionError {
    /// No subscription record exists for the user.
    NotFoundForUser { user_id: String },

    /// The one-time trial was already consumed.
    TrialAlreadyUsed { used_at: Option<Timestamp> },

    /// Yearly-to-monthly downgrade requested before the paid year is over.
    DowngradeNotAvailable { available_at: Option<Timestamp> },

    /// The plan is handled by sales, not by self-serve transitions.
    PlanNotAutomated { plan: PlanType },

    /// Price id or plan name that the catalog does not recognize, or a
    /// plan that cannot be purchased.
    UnknownPlan { detail: String },

    /// The record is in a state the requested operation does not allow.
    InvalidState { reason: String },

    /// A webhook event is missing a required metadata field.
    MissingEventMetadata { field: &'static str },

    /// The payment provider rejected or failed a call.
    ProviderError { reason: String },

    /// Input failed validation.
    ValidationFailed(ValidationError),

    /// Concurrent writers raced on the same record.
    Conflict { reason: String },

    /// Database or other infrastructure failure.
    Infrastructure { reason: String },
}

impl SubscriptionError {
    pub fn not_found_for_user(user_id: impl Into<String>) -> Self {
        SubscriptionError::NotFoundForUser {
            user_id: user_id.into(),
        }
    }

    pub fn trial_already_used(used_at: Option<Timestamp>) -> Self {
        SubscriptionError::TrialAlreadyUsed { used_at }
    }

    pub fn downgrade_not_available(available_at: Option<Timestamp>) -> Self {
        SubscriptionError::DowngradeNotAvailable { available_at }
    }

    pub fn unknown_plan(detail: impl Into<String>) -> Self {
        SubscriptionError::UnknownPlan {
            detail: detail.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        SubscriptionError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn provider(reason: impl Into<String>) -> Self {
        SubscriptionError::ProviderError {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        SubscriptionError::Conflict {
            reason: reason.into(),
        }
    }

    pub fn infrastructure(reason: impl Into<String>) -> Self {
        SubscriptionError::Infrastructure {
            reason: reason.into(),
        }
    }

    /// Stable error code for API responses and logs.
    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::NotFoundForUser { .. } => ErrorCode::SubscriptionNotFound,
            SubscriptionError::TrialAlreadyUsed { .. } => ErrorCode::TrialAlreadyUsed,
            SubscriptionError::DowngradeNotAvailable { .. } => ErrorCode::DowngradeNotAvailable,
            SubscriptionError::PlanNotAutomated { .. } => ErrorCode::PlanNotAutomated,
            SubscriptionError::UnknownPlan { .. } => ErrorCode::UnknownPlan,
            SubscriptionError::InvalidState { .. } => ErrorCode::InvalidStateTransition,
            SubscriptionError::MissingEventMetadata { .. } => ErrorCode::MissingEventMetadata,
            SubscriptionError::ProviderError { .. } => ErrorCode::PaymentProviderError,
            SubscriptionError::ValidationFailed(_) => ErrorCode::ValidationFailed,
            SubscriptionError::Conflict { .. } => ErrorCode::ConcurrentModification,
            SubscriptionError::Infrastructure { .. } => ErrorCode::DatabaseError,
        }
    }

    /// Human-readable message for API responses.
    pub fn message(&self) -> String {
        match self {
            SubscriptionError::NotFoundForUser { user_id } => {
                format!("No subscription found for user {}", user_id)
            }
            SubscriptionError::TrialAlreadyUsed { .. } => {
                "Free trial has already been used".to_string()
            }
            SubscriptionError::DowngradeNotAvailable { available_at } => match available_at {
                Some(at) => format!(
                    "Downgrade to monthly becomes available on {}",
                    at.format_long_date()
                ),
                None => "Downgrade is not available yet".to_string(),
            },
            SubscriptionError::PlanNotAutomated { plan } => {
                format!("The {} plan is not available through self-serve checkout; please contact sales", plan.display_name())
            }
            SubscriptionError::UnknownPlan { detail } => format!("Unknown plan: {}", detail),
            SubscriptionError::InvalidState { reason } => {
                format!("Operation not allowed in current state: {}", reason)
            }
            SubscriptionError::MissingEventMetadata { field } => {
                format!("Payment event is missing required metadata field '{}'", field)
            }
            SubscriptionError::ProviderError { reason } => {
                format!("Payment provider error: {}", reason)
            }
            SubscriptionError::ValidationFailed(err) => err.to_string(),
            SubscriptionError::Conflict { reason } => {
                format!("Concurrent modification: {}", reason)
            }
            SubscriptionError::Infrastructure { reason } => {
                format!("Internal error: {}", reason)
            }
        }
    }

    /// True when retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::ProviderError { .. }
                | SubscriptionError::Conflict { .. }
                | SubscriptionError::Infrastructure { .. }
        )
    }
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for SubscriptionError {}

impl From<ValidationError> for SubscriptionError {
    fn from(err: ValidationError) -> Self {
        SubscriptionError::ValidationFailed(err)
    }
}

impl From<DomainError> for SubscriptionError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::SubscriptionNotFound => SubscriptionError::NotFoundForUser {
                user_id: err
                    .details
                    .get("user_id")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
            },
            ErrorCode::ConcurrentModification => SubscriptionError::Conflict {
                reason: err.message,
            },
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                SubscriptionError::Infrastructure {
                    reason: err.message,
                }
            }
            _ => SubscriptionError::InvalidState {
                reason: err.message,
            },
        }
    }
}

impl From<SubscriptionError> for DomainError {
    fn from(err: SubscriptionError) -> Self {
        DomainError::new(err.code(), err.message())
    }
}
