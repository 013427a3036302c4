//! Payment provider port.
//!
//! The single seam between this system and Stripe. Types here are
//! provider-shaped but adapter-agnostic; the stripe adapter maps its wire
//! format into them.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::domain::subscription::SubscriptionError;

/// A customer object at the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
    pub deleted: bool,
    pub metadata: HashMap<String, String>,
}

impl ProviderCustomer {
    /// The user id stamped into the customer's metadata, if present.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("user_id").map(String::as_str)
    }
}

/// A subscription object at the provider, flattened to the fields this
/// system reads. `item_id` is the id of the single subscription item,
/// required for price updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub price_id: Option<String>,
    pub item_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ProviderSubscription {
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("user_id").map(String::as_str)
    }
}

/// Request to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    /// Existing provider customer to attach, if known.
    pub customer_id: Option<String>,
    /// Fallback when no customer exists yet.
    pub customer_email: Option<String>,
    pub price_id: String,
    /// Stamped into both session and subscription metadata so webhook
    /// events can be attributed.
    pub user_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Proration behavior for in-place price changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProrationBehavior {
    /// Credit unused time; used for upgrades.
    CreateProrations,
    /// No proration; used for downgrades and trial conversions.
    None,
}

impl ProrationBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProrationBehavior::CreateProrations => "create_prorations",
            ProrationBehavior::None => "none",
        }
    }
}

/// Error categories for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentErrorCode {
    /// The referenced object no longer exists at the provider.
    ResourceMissing,
    /// The provider rejected the request as malformed.
    InvalidRequest,
    /// The provider returned an error or unexpected response.
    ProviderError,
    /// The request never reached the provider.
    NetworkError,
}

/// Error from a payment provider call.
#[derive(Debug, Clone)]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub message: String,
    /// The provider's own error code string, when it sent one.
    pub provider_code: Option<String>,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn is_resource_missing(&self) -> bool {
        self.code == PaymentErrorCode::ResourceMissing
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            PaymentErrorCode::ProviderError | PaymentErrorCode::NetworkError
        )
    }
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for SubscriptionError {
    fn from(err: PaymentError) -> Self {
        SubscriptionError::provider(err.message)
    }
}

/// Outbound API surface of the payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Fetches a customer. Returns `None` for unknown ids.
    async fn get_customer(&self, customer_id: &str)
        -> Result<Option<ProviderCustomer>, PaymentError>;

    /// Finds the most recent customer with the given email.
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError>;

    /// Stamps `metadata.user_id` onto a customer.
    async fn set_customer_user_id(
        &self,
        customer_id: &str,
        user_id: &str,
    ) -> Result<(), PaymentError>;

    /// Opens a hosted checkout session in subscription mode.
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Fetches a subscription. Returns `None` for unknown ids.
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError>;

    /// Moves a subscription item to a new price.
    ///
    /// Callers must pass the item id obtained from `get_subscription`;
    /// the provider rejects price changes addressed to the subscription
    /// alone.
    async fn update_subscription_item(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
        proration: ProrationBehavior,
    ) -> Result<ProviderSubscription, PaymentError>;

    /// Cancels a subscription, either at the period end or immediately.
    ///
    /// A missing subscription surfaces as `ResourceMissing` so callers
    /// can treat the cancellation as already complete.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<(), PaymentError>;
}
