//! APCS Prep subscription API server.
//!
//! ## REST Endpoints
//!
//! - `GET /api/subscription` - Current user's subscription view
//! - `POST /api/subscription/trial` - Start the free trial
//! - `POST /api/subscription/checkout` - Create a checkout session or switch plans
//! - `POST /api/subscription/cancel` - Cancel at period end (or downgrade)
//! - `POST /api/webhooks/stripe` - Stripe webhook handler
//! - `GET /health` - Liveness probe

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use apcs_prep::adapters::auth::{JwtConfig, JwtSessionValidator};
use apcs_prep::adapters::http::middleware::{auth_middleware, AuthState};
use apcs_prep::adapters::http::subscription::{api_router, SubscriptionAppState};
use apcs_prep::adapters::notify::InMemorySubscriptionNotifier;
use apcs_prep::adapters::postgres::{
    PostgresProfileRepository, PostgresSubscriptionRepository, PostgresWebhookEventRepository,
};
use apcs_prep::adapters::stripe::{StripeConfig, StripePaymentAdapter};
use apcs_prep::application::{SubscriptionViewCache, WebhookRetentionSweep};
use apcs_prep::config::AppConfig;
use apcs_prep::domain::subscription::{PlanCatalog, StripeWebhookVerifier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.server.log_level)?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    tracing::info!(
        environment = ?config.server.environment,
        stripe_test_mode = config.payment.is_test_mode(),
        "Configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .idle_timeout(config.database.idle_timeout())
        .max_lifetime(config.database.max_lifetime())
        .connect(&config.database.url)
        .await?;
    tracing::info!("Database pool created");

    if config.database.run_migrations {
        sqlx::migrate!().run(&pool).await?;
        tracing::info!("Migrations applied");
    }

    // Adapters
    let subscriptions = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let profiles = Arc::new(PostgresProfileRepository::new(pool.clone()));
    let webhook_events = Arc::new(PostgresWebhookEventRepository::new(pool.clone()));
    let payment = Arc::new(StripePaymentAdapter::new(StripeConfig::new(
        config.payment.stripe_api_key.clone(),
    )));
    let notifier = Arc::new(InMemorySubscriptionNotifier::default());

    // View cache refreshed through the notifier's broadcast channel
    let view_cache = Arc::new(SubscriptionViewCache::new(subscriptions.clone()));
    let _listener = view_cache.spawn_invalidation_listener(notifier.subscribe());

    // Dedup records only matter within the provider's redelivery horizon
    let retention = WebhookRetentionSweep::new(
        webhook_events.clone(),
        config.payment.webhook_retention_days,
    );
    let _sweeper = retention.spawn(Duration::from_secs(24 * 60 * 60));

    let state = SubscriptionAppState {
        subscriptions,
        profiles,
        payment,
        notifier,
        webhook_events,
        view_cache,
        webhook_verifier: Arc::new(StripeWebhookVerifier::new(
            config.payment.stripe_webhook_secret.clone(),
        )),
        catalog: PlanCatalog::new(
            config.payment.stripe_monthly_price_id.clone(),
            config.payment.stripe_yearly_price_id.clone(),
        ),
        trial_days: config.payment.trial_duration_days,
        checkout_success_url: config.payment.checkout_success_url.clone(),
        checkout_cancel_url: config.payment.checkout_cancel_url.clone(),
    };

    let validator: AuthState = Arc::new(JwtSessionValidator::new(JwtConfig::new(
        config.auth.jwt_secret.clone(),
        config.auth.jwt_audience.clone(),
    )));

    let app = build_router(state, validator, &config);

    let addr = config.server.socket_addr()?;
    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_router(state: SubscriptionAppState, validator: AuthState, config: &AppConfig) -> Router {
    let cors = cors_layer(config);

    // Middleware stack (outermost first)
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )));

    let api = api_router()
        .layer(axum::middleware::from_fn_with_state(
            validator,
            auth_middleware,
        ))
        .with_state(state);

    // Health route bypasses auth and timeout
    Router::new()
        .nest("/api", api)
        .layer(middleware)
        .route("/health", get(|| async { "ok" }))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(error) => tracing::error!(?error, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
