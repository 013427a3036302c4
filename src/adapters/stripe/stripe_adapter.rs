//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` trait against the Stripe REST API.
//! All calls are form-encoded with the secret key as HTTP basic auth.
//! Webhook signature verification lives in the domain layer; this
//! adapter covers the outbound API surface only.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key);
//! let adapter = StripePaymentAdapter::new(config);
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::ports::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentErrorCode, PaymentProvider,
    ProviderCustomer, ProviderSubscription, ProrationBehavior,
};

use super::api_types::{
    StripeCheckoutSession, StripeCustomer, StripeCustomerList, StripeErrorResponse,
    StripeSubscription,
};

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for the Stripe API (default: https://api.stripe.com).
    api_base_url: String,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: "https://api.stripe.com".to_string(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

/// Stripe payment provider adapter.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripePaymentAdapter {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Maps a non-success response to a `PaymentError`, distinguishing
    /// `resource_missing` so callers can treat absent objects as absent.
    async fn error_from_response(
        &self,
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> PaymentError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(envelope) = serde_json::from_str::<StripeErrorResponse>(&body) {
            let provider_code = envelope.error.code.clone().unwrap_or_default();
            let message = envelope
                .error
                .message
                .unwrap_or_else(|| format!("Stripe API error ({})", status));

            tracing::error!(endpoint, %status, code = %provider_code, "Stripe API call failed");

            let code = if provider_code == "resource_missing" {
                PaymentErrorCode::ResourceMissing
            } else if status.is_client_error() {
                PaymentErrorCode::InvalidRequest
            } else {
                PaymentErrorCode::ProviderError
            };
            return PaymentError::new(code, message).with_provider_code(provider_code);
        }

        tracing::error!(endpoint, %status, body = %body, "Stripe API call failed");
        PaymentError::new(
            PaymentErrorCode::ProviderError,
            format!("Stripe API error ({}): {}", status, body),
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: String,
    ) -> Result<Option<T>, PaymentError> {
        let response = self
            .http_client
            .get(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(|e| PaymentError::new(PaymentErrorCode::NetworkError, e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let err = self.error_from_response(endpoint, response).await;
            if err.is_resource_missing() {
                return Ok(None);
            }
            return Err(err);
        }

        let parsed = response.json::<T>().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })?;
        Ok(Some(parsed))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: String,
        params: &[(&str, String)],
    ) -> Result<T, PaymentError> {
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .form(params)
            .send()
            .await
            .map_err(|e| PaymentError::new(PaymentErrorCode::NetworkError, e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(endpoint, response).await);
        }

        response.json::<T>().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })
    }
}

fn to_provider_customer(customer: StripeCustomer) -> ProviderCustomer {
    ProviderCustomer {
        id: customer.id,
        email: customer.email,
        deleted: customer.deleted,
        metadata: customer.metadata,
    }
}

fn to_provider_subscription(sub: StripeSubscription) -> ProviderSubscription {
    let item = sub.items.data.into_iter().next();
    ProviderSubscription {
        id: sub.id,
        customer_id: sub.customer,
        status: sub.status,
        current_period_end: sub.current_period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
        price_id: item.as_ref().map(|i| i.price.id.clone()),
        item_id: item.map(|i| i.id),
        metadata: sub.metadata,
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentAdapter {
    async fn get_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError> {
        let url = format!("{}/v1/customers/{}", self.config.api_base_url, customer_id);
        let customer: Option<StripeCustomer> = self.get_json("get_customer", url).await?;
        Ok(customer.map(to_provider_customer))
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError> {
        let url = format!(
            "{}/v1/customers?email={}&limit=1",
            self.config.api_base_url,
            urlencode(email)
        );
        let list: Option<StripeCustomerList> =
            self.get_json("find_customer_by_email", url).await?;
        Ok(list
            .and_then(|l| l.data.into_iter().next())
            .map(to_provider_customer))
    }

    async fn set_customer_user_id(
        &self,
        customer_id: &str,
        user_id: &str,
    ) -> Result<(), PaymentError> {
        let url = format!("{}/v1/customers/{}", self.config.api_base_url, customer_id);
        let params = [("metadata[user_id]", user_id.to_string())];
        let _: StripeCustomer = self
            .post_form("set_customer_user_id", url, &params)
            .await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);

        // The user id is stamped on both the session and the subscription
        // it creates so every later webhook can attribute the object.
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", request.price_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("metadata[user_id]", request.user_id.clone()),
            (
                "subscription_data[metadata][user_id]",
                request.user_id.clone(),
            ),
            ("allow_promotion_codes", "true".to_string()),
            ("billing_address_collection", "required".to_string()),
        ];

        if let Some(customer_id) = &request.customer_id {
            params.push(("customer", customer_id.clone()));
        } else if let Some(email) = &request.customer_email {
            params.push(("customer_email", email.clone()));
        }

        let session: StripeCheckoutSession = self
            .post_form("create_checkout_session", url, &params)
            .await?;

        tracing::info!(
            session_id = %session.id,
            price_id = %request.price_id,
            "checkout session created"
        );

        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        let url = format!(
            "{}/v1/subscriptions/{}",
            self.config.api_base_url, subscription_id
        );
        let sub: Option<StripeSubscription> = self.get_json("get_subscription", url).await?;
        Ok(sub.map(to_provider_subscription))
    }

    async fn update_subscription_item(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
        proration: ProrationBehavior,
    ) -> Result<ProviderSubscription, PaymentError> {
        let url = format!(
            "{}/v1/subscriptions/{}",
            self.config.api_base_url, subscription_id
        );
        let params = [
            ("items[0][id]", item_id.to_string()),
            ("items[0][price]", price_id.to_string()),
            ("proration_behavior", proration.as_str().to_string()),
            ("cancel_at_period_end", "false".to_string()),
        ];

        let sub: StripeSubscription = self
            .post_form("update_subscription_item", url, &params)
            .await?;

        tracing::info!(
            subscription_id,
            price_id,
            proration = proration.as_str(),
            "subscription item moved to new price"
        );

        Ok(to_provider_subscription(sub))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<(), PaymentError> {
        let url = format!(
            "{}/v1/subscriptions/{}",
            self.config.api_base_url, subscription_id
        );

        let response = if at_period_end {
            self.http_client
                .post(&url)
                .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
                .form(&[("cancel_at_period_end", "true")])
                .send()
                .await
        } else {
            self.http_client
                .delete(&url)
                .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
                .send()
                .await
        }
        .map_err(|e| PaymentError::new(PaymentErrorCode::NetworkError, e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::new(
                PaymentErrorCode::ResourceMissing,
                format!("No such subscription: {}", subscription_id),
            ));
        }
        if !response.status().is_success() {
            return Err(self.error_from_response("cancel_subscription", response).await);
        }

        tracing::info!(subscription_id, at_period_end, "subscription canceled");
        Ok(())
    }
}

/// Percent-encodes the characters that matter in an email query value.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
