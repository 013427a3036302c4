//! Read-side subscription view and its per-user cache.
//!
//! The view is what the HTTP surface returns: a flattened projection of
//! the subscription record with the derived access flags precomputed.
//! Users without a record get a synthesized free view; nothing is
//! written back on the read path.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::domain::subscription::{PlanType, SubscriptionRecord, SubscriptionStatus};
use crate::ports::SubscriptionRepository;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionView {
    pub plan: PlanType,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub can_downgrade: bool,
    pub downgrade_available_at: Option<Timestamp>,
    pub is_in_trial_period: bool,
    pub has_premium_access: bool,
}

impl SubscriptionView {
    pub fn from_record(record: Option<&SubscriptionRecord>, now: Timestamp) -> Self {
        match record {
            Some(record) => Self {
                plan: record.plan,
                status: record.status,
                current_period_end: record.current_period_end,
                cancel_at_period_end: record.cancel_at_period_end,
                can_downgrade: record.can_downgrade,
                downgrade_available_at: record.downgrade_available_at,
                is_in_trial_period: record.is_in_trial_period(now),
                has_premium_access: record.has_premium_access(now),
            },
            None => Self::default_free(),
        }
    }

    /// View for a user with no subscription row.
    pub fn default_free() -> Self {
        Self {
            plan: PlanType::Free,
            status: SubscriptionStatus::Inactive,
            current_period_end: None,
            cancel_at_period_end: false,
            can_downgrade: false,
            downgrade_available_at: None,
            is_in_trial_period: false,
            has_premium_access: false,
        }
    }
}

/// Per-user view cache with request coalescing.
///
/// Concurrent cache misses for the same user share a single repository
/// load through the per-user lock; distinct users load independently.
/// Writers invalidate through [`invalidate`] or the broadcast listener.
///
/// [`invalidate`]: SubscriptionViewCache::invalidate
pub struct SubscriptionViewCache {
    subscriptions: Arc<dyn SubscriptionRepository>,
    entries: Mutex<HashMap<String, SubscriptionView>>,
    loading: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SubscriptionViewCache {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self {
            subscriptions,
            entries: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached view, loading it on a miss.
    pub async fn get(&self, user_id: &UserId) -> Result<SubscriptionView, DomainError> {
        if let Some(view) = self.entries.lock().await.get(user_id.as_str()) {
            return Ok(view.clone());
        }
        self.load_coalesced(user_id).await
    }

    /// Loads a fresh view regardless of cache state.
    pub async fn force_refresh(&self, user_id: &UserId) -> Result<SubscriptionView, DomainError> {
        self.entries.lock().await.remove(user_id.as_str());
        self.load_coalesced(user_id).await
    }

    /// Drops the cached view so the next read reloads.
    pub async fn invalidate(&self, user_id: &str) {
        self.entries.lock().await.remove(user_id);
    }

    /// Consumes invalidation messages until the channel closes.
    ///
    /// Lagged receivers clear the whole cache rather than risk serving
    /// a view whose invalidation was dropped.
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        mut receiver: broadcast::Receiver<String>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(user_id) => cache.invalidate(&user_id).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "invalidation channel lagged, clearing view cache");
                        cache.entries.lock().await.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn load_coalesced(&self, user_id: &UserId) -> Result<SubscriptionView, DomainError> {
        let lock = {
            let mut loading = self.loading.lock().await;
            Arc::clone(
                loading
                    .entry(user_id.as_str().to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let _guard = lock.lock().await;

        // A concurrent load may have filled the entry while we waited
        let cached = self.entries.lock().await.get(user_id.as_str()).cloned();
        let result = match cached {
            Some(view) => Ok(view),
            None => match self.subscriptions.find_by_user_id(user_id).await {
                Ok(record) => {
                    let view = SubscriptionView::from_record(record.as_ref(), Timestamp::now());
                    self.entries
                        .lock()
                        .await
                        .insert(user_id.as_str().to_string(), view.clone());
                    Ok(view)
                }
                Err(e) => Err(e),
            },
        };

        // The lock entry comes out on every exit; a failed load must not
        // leave a stale lock that later requests serialize on.
        self.loading.lock().await.remove(user_id.as_str());
        result
    }

    #[cfg(test)]
    async fn in_flight_loads(&self) -> usize {
        self.loading.lock().await.len()
    }
}
