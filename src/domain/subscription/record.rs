//! The subscription record aggregate.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, SubscriptionId, Timestamp, UserId, ValidationError};

use super::plan::PlanType;
use super::status::SubscriptionStatus;

/// Authoritative subscription state fetched from the payment provider.
///
/// The reconciler builds one of these from a provider snapshot; the
/// record applies it wholesale since the provider is the source of truth.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    pub plan: PlanType,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub customer_ref: String,
    pub subscription_ref: String,
}

/// One subscription record per user.
///
/// `can_downgrade` and `downgrade_available_at` are derived from the plan
/// and period end on every write; they are never accepted from input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan: PlanType,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub can_downgrade: bool,
    pub downgrade_available_at: Option<Timestamp>,
    pub external_customer_ref: Option<String>,
    pub external_subscription_ref: Option<String>,
    pub trial_started_at: Option<Timestamp>,
    pub trial_ended_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Optimistic-locking counter, incremented by the repository on UPDATE.
    pub version: i64,
}

impl SubscriptionRecord {
    /// Creates the default record for a user with no subscription history.
    pub fn new_free(user_id: UserId, now: Timestamp) -> Self {
        let mut record = Self {
            id: SubscriptionId::new(),
            user_id,
            plan: PlanType::Free,
            status: SubscriptionStatus::Inactive,
            current_period_end: None,
            cancel_at_period_end: false,
            can_downgrade: false,
            downgrade_available_at: None,
            external_customer_ref: None,
            external_subscription_ref: None,
            trial_started_at: None,
            trial_ended_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        record.recompute_derived();
        record
    }

    /// Creates a trial record running for `trial_days` from `now`.
    pub fn new_trial(user_id: UserId, trial_days: u32, now: Timestamp) -> Self {
        let mut record = Self::new_free(user_id, now);
        record.plan = PlanType::Trial;
        // Trials are written as active, not trialing: the trialing status
        // is reserved for provider-reported subscription trials.
        record.status = SubscriptionStatus::Active;
        record.current_period_end = Some(now.add_days(trial_days as i64));
        record.trial_started_at = Some(now);
        record.recompute_derived();
        record
    }

    /// Creates a record directly from a provider snapshot, for users whose
    /// first local write comes from a payment event.
    pub fn from_provider_snapshot(user_id: UserId, snapshot: ProviderSnapshot, now: Timestamp) -> Self {
        let mut record = Self::new_free(user_id, now);
        record.apply_provider_snapshot(snapshot, now);
        record
    }

    /// Applies an authoritative provider snapshot.
    ///
    /// Returns true if this write ended a trial (the record was on the
    /// trial plan and the snapshot carries a paid plan), in which case
    /// `trial_ended_at` is stamped.
    pub fn apply_provider_snapshot(&mut self, snapshot: ProviderSnapshot, now: Timestamp) -> bool {
        let ended_trial =
            self.plan == PlanType::Trial && snapshot.plan.is_paid() && self.trial_ended_at.is_none();
        if ended_trial {
            self.trial_ended_at = Some(now);
        }

        self.plan = snapshot.plan;
        self.status = snapshot.status;
        self.current_period_end = snapshot.current_period_end;
        self.cancel_at_period_end = snapshot.cancel_at_period_end;
        self.external_customer_ref = Some(snapshot.customer_ref);
        self.external_subscription_ref = Some(snapshot.subscription_ref);
        self.updated_at = now;
        self.recompute_derived();
        ended_trial
    }

    /// Changes the plan after a successful in-place provider update.
    pub fn change_plan(&mut self, plan: PlanType, now: Timestamp) {
        if self.plan == PlanType::Trial && plan.is_paid() && self.trial_ended_at.is_none() {
            self.trial_ended_at = Some(now);
        }
        self.plan = plan;
        self.status = SubscriptionStatus::Active;
        self.cancel_at_period_end = false;
        self.updated_at = now;
        self.recompute_derived();
    }

    /// Schedules cancellation at the period end. Status stays as-is so
    /// access continues until the paid period runs out.
    pub fn schedule_cancellation(&mut self, now: Timestamp) {
        self.cancel_at_period_end = true;
        self.updated_at = now;
    }

    /// Cancels immediately, validated against the status state machine.
    pub fn cancel_now(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(SubscriptionStatus::Canceled)?;
        self.cancel_at_period_end = false;
        self.updated_at = now;
        Ok(())
    }

    /// Marks the record inactive when the provider object no longer exists.
    pub fn mark_inactive(&mut self, now: Timestamp) {
        self.status = SubscriptionStatus::Inactive;
        self.cancel_at_period_end = false;
        self.updated_at = now;
    }

    /// True while a trial plan's period end lies in the future.
    pub fn is_in_trial_period(&self, now: Timestamp) -> bool {
        self.plan == PlanType::Trial
            && self
                .current_period_end
                .map(|end| end.is_after(&now))
                .unwrap_or(false)
    }

    /// True when the user currently has access to paid content.
    pub fn has_premium_access(&self, now: Timestamp) -> bool {
        if !self.status.grants_access() {
            return false;
        }
        if self.plan == PlanType::Trial {
            return self.is_in_trial_period(now);
        }
        self.plan.is_paid()
    }

    /// Recomputes the derived downgrade flags from the stored fields.
    /// Repositories call this after loading since the flags are not
    /// persisted.
    pub fn rederive(&mut self) {
        self.recompute_derived();
    }

    fn recompute_derived(&mut self) {
        self.can_downgrade = self.plan == PlanType::StudentMonthly;
        self.downgrade_available_at = if self.plan == PlanType::StudentYearly {
            self.current_period_end
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user_test_1").unwrap()
    }

    fn snapshot(plan: PlanType, period_end: Option<Timestamp>) -> ProviderSnapshot {
        ProviderSnapshot {
            plan,
            status: SubscriptionStatus::Active,
            current_period_end: period_end,
            cancel_at_period_end: false,
            customer_ref: "cus_123".into(),
            subscription_ref: "sub_123".into(),
        }
    }

    #[test]
    fn new_free_record_grants_no_access() {
        let now = Timestamp::now();
        let record = SubscriptionRecord::new_free(user(), now);
        assert_eq!(record.plan, PlanType::Free);
        assert_eq!(record.status, SubscriptionStatus::Inactive);
        assert!(!record.has_premium_access(now));
    }

    #[test]
    fn new_trial_runs_for_requested_days() {
        let now = Timestamp::from_unix_secs(1_700_000_000);
        let record = SubscriptionRecord::new_trial(user(), 14, now);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.trial_started_at, Some(now));
        assert_eq!(record.current_period_end, Some(now.add_days(14)));
        assert!(record.has_premium_access(now));
        assert!(record.is_in_trial_period(now));
    }

    #[test]
    fn expired_trial_grants_no_access() {
        let start = Timestamp::from_unix_secs(1_700_000_000);
        let record = SubscriptionRecord::new_trial(user(), 14, start);
        let after_expiry = start.add_days(15);
        assert!(!record.has_premium_access(after_expiry));
    }

    #[test]
    fn monthly_plan_can_downgrade_yearly_cannot() {
        let now = Timestamp::now();
        let period_end = Some(now.add_days(30));

        let mut record = SubscriptionRecord::new_free(user(), now);
        record.apply_provider_snapshot(snapshot(PlanType::StudentMonthly, period_end), now);
        assert!(record.can_downgrade);
        assert_eq!(record.downgrade_available_at, None);

        record.apply_provider_snapshot(snapshot(PlanType::StudentYearly, period_end), now);
        assert!(!record.can_downgrade);
        assert_eq!(record.downgrade_available_at, period_end);
    }

    #[test]
    fn snapshot_onto_trial_stamps_trial_end() {
        let now = Timestamp::from_unix_secs(1_700_000_000);
        let mut record = SubscriptionRecord::new_trial(user(), 14, now);
        let later = now.add_days(3);
        let ended = record.apply_provider_snapshot(
            snapshot(PlanType::StudentMonthly, Some(later.add_days(30))),
            later,
        );
        assert!(ended);
        assert_eq!(record.trial_ended_at, Some(later));
        assert_eq!(record.trial_started_at, Some(now));
    }

    #[test]
    fn trial_end_stamp_is_one_shot() {
        let now = Timestamp::from_unix_secs(1_700_000_000);
        let mut record = SubscriptionRecord::new_trial(user(), 14, now);
        let first = now.add_days(3);
        record.apply_provider_snapshot(snapshot(PlanType::StudentMonthly, None), first);
        let ended_again =
            record.apply_provider_snapshot(snapshot(PlanType::StudentYearly, None), now.add_days(5));
        assert!(!ended_again);
        assert_eq!(record.trial_ended_at, Some(first));
    }

    #[test]
    fn schedule_cancellation_keeps_status() {
        let now = Timestamp::now();
        let mut record = SubscriptionRecord::new_free(user(), now);
        record.apply_provider_snapshot(snapshot(PlanType::StudentYearly, Some(now.add_days(200))), now);
        record.schedule_cancellation(now);
        assert!(record.cancel_at_period_end);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.has_premium_access(now));
    }

    #[test]
    fn cancel_now_moves_to_canceled() {
        let now = Timestamp::now();
        let mut record = SubscriptionRecord::new_free(user(), now);
        record.apply_provider_snapshot(snapshot(PlanType::StudentMonthly, Some(now.add_days(30))), now);
        record.cancel_now(now).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Canceled);
        assert!(!record.has_premium_access(now));
    }

    #[test]
    fn change_plan_recomputes_derived_fields() {
        let now = Timestamp::now();
        let mut record = SubscriptionRecord::new_free(user(), now);
        record.apply_provider_snapshot(snapshot(PlanType::StudentMonthly, Some(now.add_days(30))), now);
        record.change_plan(PlanType::StudentYearly, now);
        assert!(!record.can_downgrade);
        assert_eq!(record.downgrade_available_at, record.current_period_end);
    }
}
