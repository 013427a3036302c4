//! Plan transition decision table.
//!
//! `decide` is a pure function over the current record and the requested
//! plan. It never touches the provider or the store; the transition
//! handler executes whatever it decides.

use crate::domain::foundation::Timestamp;

use super::plan::PlanType;
use super::record::SubscriptionRecord;
use super::status::SubscriptionStatus;

/// Outcome of evaluating a requested plan change.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionDecision {
    /// No usable provider subscription exists; send the user through
    /// checkout. The local record is written later by the reconciler.
    StartCheckout,
    /// Update the existing provider subscription's price in place.
    /// Upgrades prorate; downgrades and trial conversions do not.
    UpdateInPlace { prorate: bool },
    /// The user already has this plan; nothing to do.
    AlreadyOnPlan,
    /// Plan is sold through sales, never through self-serve transitions.
    NotAutomated,
    /// Target plan cannot be bought (free and trial are not purchasable).
    NotPurchasable,
    /// Yearly-to-monthly downgrade requested before the paid year is over.
    DowngradeNotYet { available_at: Option<Timestamp> },
}

/// True when the record points at a provider subscription that can still
/// be modified in place.
fn has_live_provider_subscription(record: &SubscriptionRecord) -> bool {
    record.external_subscription_ref.is_some()
        && matches!(
            record.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
}

/// Evaluates the decision table for a requested transition.
pub fn decide(current: Option<&SubscriptionRecord>, target: PlanType) -> TransitionDecision {
    if target == PlanType::Classroom {
        return TransitionDecision::NotAutomated;
    }
    if !target.is_self_serve() {
        return TransitionDecision::NotPurchasable;
    }

    let record = match current {
        Some(record) => record,
        None => return TransitionDecision::StartCheckout,
    };

    if record.plan == PlanType::Classroom {
        return TransitionDecision::NotAutomated;
    }

    if !has_live_provider_subscription(record) {
        return TransitionDecision::StartCheckout;
    }

    if record.plan == target {
        return TransitionDecision::AlreadyOnPlan;
    }

    match (record.plan, target) {
        (PlanType::Trial, _) => TransitionDecision::UpdateInPlace { prorate: false },
        (PlanType::StudentMonthly, PlanType::StudentYearly) => {
            TransitionDecision::UpdateInPlace { prorate: true }
        }
        (PlanType::StudentYearly, PlanType::StudentMonthly) => {
            if record.can_downgrade {
                TransitionDecision::UpdateInPlace { prorate: false }
            } else {
                TransitionDecision::DowngradeNotYet {
                    available_at: record.downgrade_available_at,
                }
            }
        }
        // A live subscription on the free plan should not exist; treat it
        // as a fresh purchase.
        _ => TransitionDecision::StartCheckout,
    }
}
