//! HTTP handlers for the subscription endpoints.
//!
//! These handlers connect axum routes to the application layer. State is
//! a bundle of Arc-wrapped ports plus the plan catalog; request handlers
//! build command handlers on demand.

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::handlers::subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, ReconcilePaymentEventHandler,
    RequestTransitionCommand, RequestTransitionHandler, RequestTrialCommand, RequestTrialHandler,
};
use crate::application::{SubscriptionView, SubscriptionViewCache};
use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    IdempotentWebhookProcessor, PlanCatalog, StripeWebhookVerifier, SubscriptionError,
    WebhookError,
};
use crate::ports::{
    PaymentProvider, ProfileRepository, SubscriptionNotifier, SubscriptionRepository,
    WebhookEventRepository,
};

use super::dto::{
    CancelResponse, CheckoutRequest, ErrorResponse, SubscriptionViewResponse, TransitionResponse,
};
use crate::adapters::http::middleware::RequireAuth;

// ════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
#[derive(Clone)]
pub struct SubscriptionAppState {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub payment: Arc<dyn PaymentProvider>,
    pub notifier: Arc<dyn SubscriptionNotifier>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub view_cache: Arc<SubscriptionViewCache>,
    pub webhook_verifier: Arc<StripeWebhookVerifier>,
    pub catalog: PlanCatalog,
    pub trial_days: u32,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl SubscriptionAppState {
    pub fn trial_handler(&self) -> RequestTrialHandler {
        RequestTrialHandler::new(
            self.subscriptions.clone(),
            self.profiles.clone(),
            self.notifier.clone(),
            self.trial_days,
        )
    }

    pub fn transition_handler(&self) -> RequestTransitionHandler {
        RequestTransitionHandler::new(
            self.subscriptions.clone(),
            self.payment.clone(),
            self.notifier.clone(),
            self.catalog.clone(),
        )
    }

    pub fn cancel_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(
            self.subscriptions.clone(),
            self.payment.clone(),
            self.notifier.clone(),
        )
    }

    pub fn webhook_processor(&self) -> IdempotentWebhookProcessor {
        let reconciler = Arc::new(ReconcilePaymentEventHandler::new(
            self.subscriptions.clone(),
            self.payment.clone(),
            self.notifier.clone(),
            self.catalog.clone(),
        ));
        IdempotentWebhookProcessor::new(self.webhook_events.clone(), reconciler)
    }
}

// ════════════════════════════════════════════════════════════════
// Read Endpoint
// ════════════════════════════════════════════════════════════════

/// GET /api/subscription - current user's subscription view
pub async fn get_subscription(
    State(state): State<SubscriptionAppState>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let view = state
        .view_cache
        .get(&user.id)
        .await
        .map_err(SubscriptionError::from)?;
    Ok(Json(SubscriptionViewResponse::from(view)))
}

// ════════════════════════════════════════════════════════════════
// Command Endpoints
// ════════════════════════════════════════════════════════════════

/// POST /api/subscription/trial - consume the one-time trial
pub async fn request_trial(
    State(state): State<SubscriptionAppState>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let handler = state.trial_handler();
    let record = handler.handle(RequestTrialCommand { user: user.clone() }).await?;

    state.view_cache.invalidate(user.id.as_str()).await;
    let view = SubscriptionView::from_record(Some(&record), Timestamp::now());
    Ok(Json(SubscriptionViewResponse::from(view)))
}

/// POST /api/subscription/checkout - start or apply a plan transition
pub async fn create_checkout(
    State(state): State<SubscriptionAppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let handler = state.transition_handler();
    let cmd = RequestTransitionCommand {
        user: user.clone(),
        price_id: request.price_id,
        success_url: state.checkout_success_url.clone(),
        cancel_url: state.checkout_cancel_url.clone(),
    };

    let outcome = handler.handle(cmd).await?;

    state.view_cache.invalidate(user.id.as_str()).await;
    Ok(Json(TransitionResponse::from(outcome)))
}

/// POST /api/subscription/cancel - cancel the current subscription
pub async fn cancel_subscription(
    State(state): State<SubscriptionAppState>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let handler = state.cancel_handler();
    let outcome = handler
        .handle(CancelSubscriptionCommand { user: user.clone() })
        .await?;

    state.view_cache.invalidate(user.id.as_str()).await;
    Ok(Json(CancelResponse::from(outcome)))
}

// ════════════════════════════════════════════════════════════════
// Webhook Endpoint
// ════════════════════════════════════════════════════════════════

/// POST /api/webhooks/stripe - handle provider webhook events
///
/// No user auth: the HMAC signature is the credential. A bad or missing
/// signature is 400; duplicate deliveries and ignorable events are 200.
pub async fn handle_stripe_webhook(
    State(state): State<SubscriptionAppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let signature = match headers.get("Stripe-Signature").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "MISSING_SIGNATURE",
                    "Missing Stripe-Signature header",
                )),
            )
                .into_response();
        }
    };

    let event = match state.webhook_verifier.verify_and_parse(&body, signature) {
        Ok(event) => event,
        Err(e) => return webhook_error_response(e),
    };

    let event_id = event.id.clone();
    match state.webhook_processor().process(event).await {
        Ok(_) => {
            tracing::info!(event_id = %event_id, "webhook acknowledged");
            (StatusCode::OK, Json(serde_json::json!({ "received": true }))).into_response()
        }
        Err(e) => webhook_error_response(e),
    }
}

fn webhook_error_response(error: WebhookError) -> axum::response::Response {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(error = %error, "webhook processing failed");
    } else {
        tracing::warn!(error = %error, "webhook rejected");
    }
    (
        status,
        Json(ErrorResponse::new("WEBHOOK_ERROR", error.to_string())),
    )
        .into_response()
}

// ════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════

/// API error type that converts subscription errors to HTTP responses.
pub struct SubscriptionApiError(SubscriptionError);

impl From<SubscriptionError> for SubscriptionApiError {
    fn from(err: SubscriptionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for SubscriptionApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code) = match &self.0 {
            SubscriptionError::NotFoundForUser { .. } => {
                (StatusCode::NOT_FOUND, "SUBSCRIPTION_NOT_FOUND")
            }
            SubscriptionError::TrialAlreadyUsed { .. } => {
                (StatusCode::FORBIDDEN, "TRIAL_ALREADY_USED")
            }
            SubscriptionError::DowngradeNotAvailable { .. } => {
                (StatusCode::FORBIDDEN, "DOWNGRADE_NOT_AVAILABLE")
            }
            SubscriptionError::PlanNotAutomated { .. } => {
                (StatusCode::FORBIDDEN, "PLAN_NOT_AUTOMATED")
            }
            SubscriptionError::UnknownPlan { .. } => (StatusCode::BAD_REQUEST, "UNKNOWN_PLAN"),
            SubscriptionError::ValidationFailed(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_FAILED")
            }
            SubscriptionError::MissingEventMetadata { .. } => {
                (StatusCode::BAD_REQUEST, "MISSING_METADATA")
            }
            SubscriptionError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
            SubscriptionError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            SubscriptionError::ProviderError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR")
            }
            SubscriptionError::Infrastructure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let mut body = ErrorResponse::new(error_code, self.0.message());
        match &self.0 {
            SubscriptionError::TrialAlreadyUsed { used_at } => {
                body.trial_used_at = used_at.map(|t| t.to_rfc3339());
            }
            SubscriptionError::DowngradeNotAvailable { available_at } => {
                body.downgrade_available_at = available_at.map(|t| t.to_rfc3339());
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
