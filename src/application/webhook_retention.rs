//! Bounded retention for the webhook dedup store.
//!
//! Deduplication only needs to cover the provider's redelivery horizon,
//! so records past the retention window are deleted on a timer.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::WebhookEventRepository;

pub struct WebhookRetentionSweep {
    events: Arc<dyn WebhookEventRepository>,
    retention_days: u32,
}

impl WebhookRetentionSweep {
    pub fn new(events: Arc<dyn WebhookEventRepository>, retention_days: u32) -> Self {
        Self {
            events,
            retention_days,
        }
    }

    /// Deletes records older than the retention window. Returns the
    /// number removed.
    pub async fn sweep(&self, now: Timestamp) -> Result<u64, DomainError> {
        let cutoff = now.add_days(-i64::from(self.retention_days));
        let removed = self.events.delete_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff.to_rfc3339(), "expired webhook event records deleted");
        }
        Ok(removed)
    }

    /// Runs the sweep on the given interval until the task is aborted.
    /// Failures are logged and retried on the next tick.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; sweep once at startup.
            loop {
                ticker.tick().await;
                if let Err(error) = self.sweep(Timestamp::now()).await {
                    tracing::warn!(error = %error, "webhook retention sweep failed");
                }
            }
        })
    }
}
