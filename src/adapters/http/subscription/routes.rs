//! Axum router configuration for the subscription endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    cancel_subscription, create_checkout, get_subscription, handle_stripe_webhook, request_trial,
    SubscriptionAppState,
};

/// Subscription endpoints (auth required).
///
/// - `GET  /` - current subscription view
/// - `POST /trial` - consume the one-time trial
/// - `POST /checkout` - start or apply a plan transition
/// - `POST /cancel` - cancel the subscription
pub fn subscription_routes() -> Router<SubscriptionAppState> {
    Router::new()
        .route("/", get(get_subscription))
        .route("/trial", post(request_trial))
        .route("/checkout", post(create_checkout))
        .route("/cancel", post(cancel_subscription))
}

/// Webhook endpoints (no user auth; signature verified).
///
/// - `POST /stripe` - provider webhook events
pub fn webhook_routes() -> Router<SubscriptionAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// The complete API router, suitable for nesting at `/api`.
pub fn api_router() -> Router<SubscriptionAppState> {
    Router::new()
        .nest("/subscription", subscription_routes())
        .nest("/webhooks", webhook_routes())
}
