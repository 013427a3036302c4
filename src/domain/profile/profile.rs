//! User profile with the trial flag and the subscription mirror.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{PlanType, SubscriptionStatus};

/// Per-user profile row.
///
/// Carries two things the subscription system depends on: the one-way
/// trial latch, and a denormalized mirror of the subscription plan and
/// status that is always written in the same transaction as the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub email: Option<String>,
    pub subscription_plan: PlanType,
    pub subscription_status: SubscriptionStatus,
    pub trial_used: bool,
    pub trial_used_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserProfile {
    /// Creates a fresh profile with no subscription history.
    pub fn new(user_id: UserId, email: Option<String>, now: Timestamp) -> Self {
        Self {
            user_id,
            email,
            subscription_plan: PlanType::Free,
            subscription_status: SubscriptionStatus::Inactive,
            trial_used: false,
            trial_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Consumes the one-time trial. The latch never resets; calling this
    /// again keeps the original timestamp.
    pub fn mark_trial_used(&mut self, now: Timestamp) {
        if !self.trial_used {
            self.trial_used = true;
            self.trial_used_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Updates the subscription mirror.
    pub fn mirror_subscription(
        &mut self,
        plan: PlanType,
        status: SubscriptionStatus,
        now: Timestamp,
    ) {
        self.subscription_plan = plan;
        self.subscription_status = status;
        self.updated_at = now;
    }

    /// Resets the mirror when the subscription row is deleted. The trial
    /// latch survives the reset.
    pub fn reset_subscription(&mut self, now: Timestamp) {
        self.subscription_plan = PlanType::Free;
        self.subscription_status = SubscriptionStatus::Inactive;
        self.updated_at = now;
    }
}
