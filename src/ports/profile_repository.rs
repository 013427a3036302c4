//! Profile persistence port.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};
use crate::domain::profile::UserProfile;

/// Read and bootstrap access to user profiles.
///
/// Mirror and trial-latch writes go through `SubscriptionRepository` so
/// they share a transaction with the subscription row.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Finds a profile by user id.
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<UserProfile>, DomainError>;

    /// Returns the profile, creating a default one if none exists yet.
    async fn ensure_exists(
        &self,
        user_id: &UserId,
        email: Option<&str>,
    ) -> Result<UserProfile, DomainError>;
}
