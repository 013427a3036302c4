//! Subscription persistence port.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::domain::subscription::SubscriptionRecord;

/// Persistence for subscription records.
///
/// Every mutating method also writes the profile mirror inside the same
/// database transaction, so the record and the profile can never disagree.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Finds the record for a user.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` on infrastructure failure.
    async fn find_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Finds the record holding the given external subscription reference.
    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Inserts or updates the record keyed by user id, and mirrors plan
    /// and status onto the profile, in one transaction.
    ///
    /// Updates check the record's `version` and fail with
    /// `ConcurrentModification` when another writer got there first.
    async fn upsert_with_profile(&self, record: &SubscriptionRecord) -> Result<(), DomainError>;

    /// Writes a trial record and latches the profile's trial flag in one
    /// transaction.
    async fn grant_trial(
        &self,
        record: &SubscriptionRecord,
        now: Timestamp,
    ) -> Result<(), DomainError>;

    /// Deletes the user's record and resets the profile mirror to
    /// free/inactive in one transaction. Returns false when no row existed.
    async fn delete_with_profile_reset(&self, user_id: &UserId) -> Result<bool, DomainError>;
}
