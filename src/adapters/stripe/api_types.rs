//! Serde types for Stripe REST API responses.
//!
//! Only the fields the adapter reads are declared; everything else in
//! the response body is ignored.

use std::collections::HashMap;

use serde::Deserialize;

/// `/v1/customers/{id}` response.
#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Deleted customers come back as `{"id": ..., "deleted": true}`.
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// `/v1/customers?email=...` list response.
#[derive(Debug, Deserialize)]
pub struct StripeCustomerList {
    pub data: Vec<StripeCustomer>,
}

/// `/v1/subscriptions/{id}` response.
#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub items: StripeSubscriptionItemList,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItemList {
    #[serde(default)]
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
}

#[derive(Debug, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

/// `/v1/checkout/sessions` response.
#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    /// Hosted checkout URL; absent once the session is consumed.
    #[serde(default)]
    pub url: Option<String>,
}

/// Stripe error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}
