//! Idempotent webhook event processing.
//!
//! Each provider event is processed at most once:
//! 1. Check whether the event id was already recorded
//! 2. Hand the event to the reconciling handler
//! 3. Record successful and ignored outcomes keyed by event id; failures
//!    are not recorded, so the provider's redelivery reprocesses them
//!
//! Concurrent duplicate deliveries resolve through the database primary
//! key: the first insert wins, the rest observe `AlreadyExists` and
//! acknowledge without reprocessing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::{StripeEvent, WebhookError};
use crate::ports::{SaveResult, WebhookEventRecord, WebhookEventRepository, WebhookResult};

/// Handles a verified, parsed webhook event.
///
/// Returns `Ok(())` on success, `Err(WebhookError::Ignored(_))` when the
/// event should be acknowledged without action, and other variants for
/// genuine failures.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    async fn handle(&self, event: &StripeEvent) -> Result<(), WebhookError>;
}

/// Processes webhook events with exactly-once semantics.
pub struct IdempotentWebhookProcessor {
    repository: Arc<dyn WebhookEventRepository>,
    handler: Arc<dyn WebhookEventHandler>,
}

impl IdempotentWebhookProcessor {
    pub fn new(
        repository: Arc<dyn WebhookEventRepository>,
        handler: Arc<dyn WebhookEventHandler>,
    ) -> Self {
        Self {
            repository,
            handler,
        }
    }

    /// Process a webhook event exactly once.
    ///
    /// # Returns
    ///
    /// - `Ok(WebhookResult::Processed)` - event was handled (or ignored)
    /// - `Ok(WebhookResult::AlreadyProcessed)` - duplicate delivery
    /// - `Err(_)` - processing failed; the caller maps this to a 5xx so
    ///   the provider redelivers
    pub async fn process(&self, event: StripeEvent) -> Result<WebhookResult, WebhookError> {
        // 1. Check if already processed
        if self.repository.find_by_event_id(&event.id).await?.is_some() {
            tracing::debug!(event_id = %event.id, "duplicate webhook delivery skipped");
            return Ok(WebhookResult::AlreadyProcessed);
        }

        let payload = serde_json::to_value(&event)
            .map_err(|e| WebhookError::ParseError(format!("failed to serialize event: {}", e)))?;

        // 2. Process the event and build the record from the outcome
        //
        // Failures never reach the dedup store: the caller answers 5xx and
        // the provider's redelivery must find no record of the event id,
        // otherwise step 1 would acknowledge it without reprocessing.
        let record = match self.handler.handle(&event).await {
            Ok(()) => WebhookEventRecord::success(&event.id, &event.event_type, payload),
            Err(WebhookError::Ignored(reason)) => {
                WebhookEventRecord::ignored(&event.id, &event.event_type, &reason, payload)
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    error = %e,
                    "webhook handler failed, leaving event for redelivery"
                );
                return Err(e);
            }
        };

        // 3. Save the record; the insert race decides the winner
        match self.repository.save(record).await? {
            // Ignored events are acknowledged like successes
            SaveResult::Inserted => Ok(WebhookResult::Processed),
            SaveResult::AlreadyExists => Ok(WebhookResult::AlreadyProcessed),
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Database(err.to_string())
    }
}
