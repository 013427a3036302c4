//! Webhook event deduplication store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, Timestamp};

/// Record of a processed webhook event, keyed by the provider's event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: Timestamp,
    /// "success" or "ignored". Failed processing is never recorded;
    /// the provider's redelivery re-attempts it.
    pub result: String,
    pub error_message: Option<String>,
    pub payload: serde_json::Value,
}

impl WebhookEventRecord {
    pub fn success(
        event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            processed_at: Timestamp::now(),
            result: "success".to_string(),
            error_message: None,
            payload,
        }
    }

    pub fn ignored(
        event_id: &str,
        event_type: &str,
        reason: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            processed_at: Timestamp::now(),
            result: "ignored".to_string(),
            error_message: Some(reason.to_string()),
            payload,
        }
    }

}

/// Outcome of attempting to save a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// We won the insert; our processing result stands.
    Inserted,
    /// Another delivery got there first.
    AlreadyExists,
}

/// Outcome of processing a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookResult {
    Processed,
    AlreadyProcessed,
}

/// Store of processed webhook event ids with bounded retention.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Looks up a previously processed event.
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    /// Saves a record; races on the event id resolve to `AlreadyExists`.
    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError>;

    /// Deletes records older than the cutoff. Returns the number removed.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
