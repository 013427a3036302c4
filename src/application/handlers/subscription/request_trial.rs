//! Trial eligibility gate.

use std::sync::Arc;

use crate::domain::foundation::{AuthenticatedUser, Timestamp};
use crate::domain::subscription::{SubscriptionError, SubscriptionRecord};
use crate::ports::{ProfileRepository, SubscriptionNotifier, SubscriptionRepository};

/// Command to start the one-time free trial.
#[derive(Debug, Clone)]
pub struct RequestTrialCommand {
    pub user: AuthenticatedUser,
}

/// Handles trial requests.
///
/// The trial is a one-way latch on the profile: once consumed it never
/// resets, regardless of what happens to the subscription record later.
pub struct RequestTrialHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    profiles: Arc<dyn ProfileRepository>,
    notifier: Arc<dyn SubscriptionNotifier>,
    trial_days: u32,
}

impl RequestTrialHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        profiles: Arc<dyn ProfileRepository>,
        notifier: Arc<dyn SubscriptionNotifier>,
        trial_days: u32,
    ) -> Self {
        Self {
            subscriptions,
            profiles,
            notifier,
            trial_days,
        }
    }

    pub async fn handle(
        &self,
        command: RequestTrialCommand,
    ) -> Result<SubscriptionRecord, SubscriptionError> {
        let user_id = command.user.id.clone();
        let now = Timestamp::now();

        // 1. Load (or bootstrap) the profile and check the latch
        let profile = self
            .profiles
            .ensure_exists(&user_id, command.user.email.as_deref())
            .await?;
        if profile.trial_used {
            return Err(SubscriptionError::trial_already_used(profile.trial_used_at));
        }

        // 2. An active paid subscription must not be clobbered by a trial
        if let Some(existing) = self.subscriptions.find_by_user_id(&user_id).await? {
            if existing.plan.is_paid() && existing.status.grants_access() {
                return Err(SubscriptionError::invalid_state(
                    "an active paid subscription already exists",
                ));
            }
        }

        // 3. Write the trial record and latch the profile atomically
        let record = SubscriptionRecord::new_trial(user_id.clone(), self.trial_days, now);
        self.subscriptions.grant_trial(&record, now).await?;

        tracing::info!(
            user_id = %user_id,
            trial_days = self.trial_days,
            "trial granted"
        );

        // 4. Invalidate cached views
        self.notifier.notify(&user_id).await;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{DomainError, UserId};
    use crate::domain::profile::UserProfile;
    use crate::domain::subscription::{PlanType, ProviderSnapshot, SubscriptionStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    // ══════════════════════════════════════════════════════════════
    // Test Infrastructure
    // ══════════════════════════════════════════════════════════════

    struct MockStore {
        records: Mutex<HashMap<String, SubscriptionRecord>>,
        profiles: Mutex<HashMap<String, UserProfile>>,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                profiles: Mutex::new(HashMap::new()),
            }
        }

        async fn with_profile(self, profile: UserProfile) -> Self {
            self.profiles
                .lock()
                .await
                .insert(profile.user_id.as_str().to_string(), profile);
            self
        }
    }

    #[async_trait]
    impl SubscriptionRepository for MockStore {
        async fn find_by_user_id(
            &self,
            user_id: &UserId,
        ) -> Result<Option<SubscriptionRecord>, DomainError> {
            Ok(self.records.lock().await.get(user_id.as_str()).cloned())
        }

        async fn find_by_subscription_ref(
            &self,
            subscription_ref: &str,
        ) -> Result<Option<SubscriptionRecord>, DomainError> {
            Ok(self
                .records
                .lock()
                .await
                .values()
                .find(|r| r.external_subscription_ref.as_deref() == Some(subscription_ref))
                .cloned())
        }

        async fn upsert_with_profile(
            &self,
            record: &SubscriptionRecord,
        ) -> Result<(), DomainError> {
            self.records
                .lock()
                .await
                .insert(record.user_id.as_str().to_string(), record.clone());
            Ok(())
        }

        async fn grant_trial(
            &self,
            record: &SubscriptionRecord,
            now: Timestamp,
        ) -> Result<(), DomainError> {
            self.records
                .lock()
                .await
                .insert(record.user_id.as_str().to_string(), record.clone());
            let mut profiles = self.profiles.lock().await;
            let profile = profiles
                .entry(record.user_id.as_str().to_string())
                .or_insert_with(|| UserProfile::new(record.user_id.clone(), None, now));
            profile.mark_trial_used(now);
            profile.mirror_subscription(record.plan, record.status, now);
            Ok(())
        }

        async fn delete_with_profile_reset(&self, user_id: &UserId) -> Result<bool, DomainError> {
            Ok(self.records.lock().await.remove(user_id.as_str()).is_some())
        }
    }

    #[async_trait]
    impl ProfileRepository for MockStore {
        async fn find_by_user_id(
            &self,
            user_id: &UserId,
        ) -> Result<Option<UserProfile>, DomainError> {
            Ok(self.profiles.lock().await.get(user_id.as_str()).cloned())
        }

        async fn ensure_exists(
            &self,
            user_id: &UserId,
            email: Option<&str>,
        ) -> Result<UserProfile, DomainError> {
            let mut profiles = self.profiles.lock().await;
            Ok(profiles
                .entry(user_id.as_str().to_string())
                .or_insert_with(|| {
                    UserProfile::new(user_id.clone(), email.map(String::from), Timestamp::now())
                })
                .clone())
        }
    }

    struct MockNotifier {
        notifications: AtomicU32,
    }

    impl MockNotifier {
        fn new() -> Self {
            Self {
                notifications: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SubscriptionNotifier for MockNotifier {
        async fn notify(&self, _user_id: &UserId) {
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn user() -> AuthenticatedUser {
        AuthenticatedUser::new(
            UserId::new("user_trial").unwrap(),
            Some("student@example.com".into()),
        )
    }

    fn handler(store: Arc<MockStore>, notifier: Arc<MockNotifier>) -> RequestTrialHandler {
        RequestTrialHandler::new(store.clone(), store, notifier, 14)
    }

    // ══════════════════════════════════════════════════════════════
    // Trial Gate
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn grants_trial_to_first_time_user() {
        let store = Arc::new(MockStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let handler = handler(store.clone(), notifier.clone());

        let record = handler
            .handle(RequestTrialCommand { user: user() })
            .await
            .unwrap();

        assert_eq!(record.plan, PlanType::Trial);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.current_period_end.is_some());

        let profile = store
            .profiles
            .lock()
            .await
            .get("user_trial")
            .cloned()
            .unwrap();
        assert!(profile.trial_used);
        assert_eq!(notifier.notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_request_is_rejected_with_original_timestamp() {
        let store = Arc::new(MockStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let handler = handler(store.clone(), notifier);

        handler
            .handle(RequestTrialCommand { user: user() })
            .await
            .unwrap();
        let first_used_at = store
            .profiles
            .lock()
            .await
            .get("user_trial")
            .unwrap()
            .trial_used_at;

        let err = handler
            .handle(RequestTrialCommand { user: user() })
            .await
            .unwrap_err();

        match err {
            SubscriptionError::TrialAlreadyUsed { used_at } => {
                assert_eq!(used_at, first_used_at);
            }
            other => panic!("expected TrialAlreadyUsed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn latch_holds_even_after_subscription_row_is_gone() {
        let now = Timestamp::now();
        let mut profile = UserProfile::new(user().id, None, now);
        profile.mark_trial_used(now);
        let store = Arc::new(MockStore::new().with_profile(profile).await);
        let handler = handler(store, Arc::new(MockNotifier::new()));

        let err = handler
            .handle(RequestTrialCommand { user: user() })
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::TrialAlreadyUsed { .. }));
    }

    #[tokio::test]
    async fn active_paid_subscription_blocks_trial() {
        let store = Arc::new(MockStore::new());
        let now = Timestamp::now();
        let mut record = SubscriptionRecord::new_free(user().id, now);
        record.apply_provider_snapshot(
            ProviderSnapshot {
                plan: PlanType::StudentMonthly,
                status: SubscriptionStatus::Active,
                current_period_end: Some(now.add_days(30)),
                cancel_at_period_end: false,
                customer_ref: "cus_1".into(),
                subscription_ref: "sub_1".into(),
            },
            now,
        );
        store
            .records
            .lock()
            .await
            .insert("user_trial".into(), record);

        let handler = handler(store, Arc::new(MockNotifier::new()));
        let err = handler
            .handle(RequestTrialCommand { user: user() })
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidState { .. }));
    }
}
