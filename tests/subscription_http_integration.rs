//! Integration tests for the subscription HTTP API.
//!
//! These tests exercise the full router: auth middleware, handlers,
//! webhook signature verification, and idempotent event processing,
//! backed by in-memory port implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::Mutex;
use tower::ServiceExt;

use apcs_prep::adapters::auth::MockSessionValidator;
use apcs_prep::adapters::http::middleware::{auth_middleware, AuthState};
use apcs_prep::adapters::http::subscription::{api_router, SubscriptionAppState};
use apcs_prep::adapters::notify::InMemorySubscriptionNotifier;
use apcs_prep::application::SubscriptionViewCache;
use apcs_prep::domain::foundation::{AuthenticatedUser, DomainError, Timestamp, UserId};
use apcs_prep::domain::profile::UserProfile;
use apcs_prep::domain::subscription::{
    PlanCatalog, PlanType, StripeWebhookVerifier, SubscriptionRecord, SubscriptionStatus,
};
use apcs_prep::ports::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentErrorCode, PaymentProvider,
    ProfileRepository, ProrationBehavior, ProviderCustomer, ProviderSubscription, SaveResult,
    SubscriptionRepository, WebhookEventRecord, WebhookEventRepository,
};

const WEBHOOK_SECRET: &str = "whsec_test_secret";
const MONTHLY_PRICE: &str = "price_monthly";
const YEARLY_PRICE: &str = "price_yearly";

// =============================================================================
// Test Infrastructure
// =============================================================================

/// In-memory store backing both the subscription and profile ports.
#[derive(Default)]
struct MemoryStore {
    records: Mutex<HashMap<String, SubscriptionRecord>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl MemoryStore {
    async fn insert_record(&self, record: SubscriptionRecord) {
        self.records
            .lock()
            .await
            .insert(record.user_id.as_str().to_string(), record);
    }

    async fn latch_trial(&self, user_id: &str, used_at: Timestamp) {
        let mut profiles = self.profiles.lock().await;
        let mut profile = UserProfile::new(
            UserId::new(user_id).unwrap(),
            Some("student@example.com".to_string()),
            used_at,
        );
        profile.trial_used = true;
        profile.trial_used_at = Some(used_at);
        profiles.insert(user_id.to_string(), profile);
    }

    async fn record_for(&self, user_id: &str) -> Option<SubscriptionRecord> {
        self.records.lock().await.get(user_id).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn find_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self.records.lock().await.get(user_id.as_str()).cloned())
    }

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .find(|r| r.external_subscription_ref.as_deref() == Some(subscription_ref))
            .cloned())
    }

    async fn upsert_with_profile(&self, record: &SubscriptionRecord) -> Result<(), DomainError> {
        let key = record.user_id.as_str().to_string();
        self.records.lock().await.insert(key.clone(), record.clone());

        let mut profiles = self.profiles.lock().await;
        let profile = profiles.entry(key).or_insert_with(|| {
            UserProfile::new(record.user_id.clone(), None, record.updated_at)
        });
        profile.subscription_plan = record.plan;
        profile.subscription_status = record.status;
        Ok(())
    }

    async fn grant_trial(
        &self,
        record: &SubscriptionRecord,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.upsert_with_profile(record).await?;
        let mut profiles = self.profiles.lock().await;
        if let Some(profile) = profiles.get_mut(record.user_id.as_str()) {
            profile.trial_used = true;
            profile.trial_used_at = Some(now);
        }
        Ok(())
    }

    async fn delete_with_profile_reset(&self, user_id: &UserId) -> Result<bool, DomainError> {
        let removed = self.records.lock().await.remove(user_id.as_str()).is_some();
        if let Some(profile) = self.profiles.lock().await.get_mut(user_id.as_str()) {
            profile.subscription_plan = PlanType::Free;
            profile.subscription_status = SubscriptionStatus::Inactive;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<UserProfile>, DomainError> {
        Ok(self.profiles.lock().await.get(user_id.as_str()).cloned())
    }

    async fn ensure_exists(
        &self,
        user_id: &UserId,
        email: Option<&str>,
    ) -> Result<UserProfile, DomainError> {
        let mut profiles = self.profiles.lock().await;
        let profile = profiles.entry(user_id.as_str().to_string()).or_insert_with(|| {
            UserProfile::new(user_id.clone(), email.map(String::from), Timestamp::now())
        });
        Ok(profile.clone())
    }
}

/// Payment provider stub with configurable subscriptions.
#[derive(Default)]
struct StubPayment {
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    checkout_calls: Mutex<Vec<CheckoutSessionRequest>>,
}

impl StubPayment {
    async fn with_subscription(self, sub: ProviderSubscription) -> Self {
        self.subscriptions.lock().await.insert(sub.id.clone(), sub);
        self
    }
}

#[async_trait]
impl PaymentProvider for StubPayment {
    async fn get_customer(
        &self,
        _customer_id: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError> {
        Ok(None)
    }

    async fn find_customer_by_email(
        &self,
        _email: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError> {
        Ok(None)
    }

    async fn set_customer_user_id(
        &self,
        _customer_id: &str,
        _user_id: &str,
    ) -> Result<(), PaymentError> {
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.checkout_calls.lock().await.push(request);
        Ok(CheckoutSession {
            id: "cs_test_1".to_string(),
            url: Some("https://checkout.example.com/cs_test_1".to_string()),
        })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        Ok(self.subscriptions.lock().await.get(subscription_id).cloned())
    }

    async fn update_subscription_item(
        &self,
        subscription_id: &str,
        _item_id: &str,
        price_id: &str,
        _proration: ProrationBehavior,
    ) -> Result<ProviderSubscription, PaymentError> {
        let mut subs = self.subscriptions.lock().await;
        let sub = subs.get_mut(subscription_id).ok_or_else(|| {
            PaymentError::new(PaymentErrorCode::ResourceMissing, "no such subscription")
        })?;
        sub.price_id = Some(price_id.to_string());
        Ok(sub.clone())
    }

    async fn cancel_subscription(
        &self,
        _subscription_id: &str,
        _at_period_end: bool,
    ) -> Result<(), PaymentError> {
        Ok(())
    }
}

/// In-memory webhook event store.
#[derive(Default)]
struct MemoryEvents {
    events: Mutex<HashMap<String, WebhookEventRecord>>,
}

impl MemoryEvents {
    async fn count(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryEvents {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        Ok(self.events.lock().await.get(event_id).cloned())
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let mut events = self.events.lock().await;
        if events.contains_key(&record.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        events.insert(record.event_id.clone(), record);
        Ok(SaveResult::Inserted)
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|_, r| r.processed_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    payment: Arc<StubPayment>,
    events: Arc<MemoryEvents>,
}

fn build_app(store: Arc<MemoryStore>, payment: Arc<StubPayment>) -> TestApp {
    let events = Arc::new(MemoryEvents::default());
    let subscriptions: Arc<dyn SubscriptionRepository> = store.clone();
    let view_cache = Arc::new(SubscriptionViewCache::new(subscriptions));

    let state = SubscriptionAppState {
        subscriptions: store.clone(),
        profiles: store.clone(),
        payment: payment.clone(),
        notifier: Arc::new(InMemorySubscriptionNotifier::default()),
        webhook_events: events.clone(),
        view_cache,
        webhook_verifier: Arc::new(StripeWebhookVerifier::new(WEBHOOK_SECRET)),
        catalog: PlanCatalog::new(MONTHLY_PRICE, YEARLY_PRICE),
        trial_days: 14,
        checkout_success_url: "http://localhost:3000/billing/success".to_string(),
        checkout_cancel_url: "http://localhost:3000/pricing".to_string(),
    };

    let validator: AuthState = Arc::new(
        MockSessionValidator::new().with_user(
            "token-1",
            AuthenticatedUser::new(
                UserId::new("user-1").unwrap(),
                Some("student@example.com".to_string()),
            ),
        ),
    );

    let router = Router::new().nest(
        "/api",
        api_router()
            .layer(axum::middleware::from_fn_with_state(
                validator,
                auth_middleware,
            ))
            .with_state(state),
    );

    TestApp {
        router,
        store,
        payment,
        events,
    }
}

fn default_app() -> TestApp {
    build_app(
        Arc::new(MemoryStore::default()),
        Arc::new(StubPayment::default()),
    )
}

fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", "Bearer token-1");
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Builds a Stripe-Signature header valid for the given payload.
fn sign_payload(payload: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},v1={}", timestamp, signature)
}

fn webhook_request(payload: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("Content-Type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("Stripe-Signature", sig);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

fn checkout_completed_event(event_id: &str, subscription_id: &str, user_id: &str) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "created": chrono::Utc::now().timestamp(),
        "livemode": false,
        "data": {
            "object": {
                "id": "cs_test_1",
                "subscription": subscription_id,
                "metadata": { "user_id": user_id }
            }
        }
    })
    .to_string()
}

fn provider_subscription(id: &str, price_id: &str) -> ProviderSubscription {
    ProviderSubscription {
        id: id.to_string(),
        customer_id: "cus_1".to_string(),
        status: "active".to_string(),
        current_period_end: Some(chrono::Utc::now().timestamp() + 30 * 86_400),
        cancel_at_period_end: false,
        price_id: Some(price_id.to_string()),
        item_id: Some("si_1".to_string()),
        metadata: HashMap::new(),
    }
}

fn yearly_record(user_id: &str) -> SubscriptionRecord {
    let now = Timestamp::now();
    let mut record = SubscriptionRecord::new_free(UserId::new(user_id).unwrap(), now);
    record.plan = PlanType::StudentYearly;
    record.status = SubscriptionStatus::Active;
    record.current_period_end = Some(now.add_days(200));
    record.external_customer_ref = Some("cus_1".to_string());
    record.external_subscription_ref = Some("sub_year".to_string());
    record.rederive();
    record
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn get_subscription_without_token_returns_401() {
    let app = default_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/subscription")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_subscription_with_unknown_token_returns_401() {
    let app = default_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/subscription")
                .header("Authorization", "Bearer bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Subscription View
// =============================================================================

#[tokio::test]
async fn get_subscription_defaults_to_free_plan() {
    let app = default_app();
    let response = app
        .router
        .oneshot(authed("GET", "/api/subscription", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["plan"], "free");
    assert_eq!(body["has_premium_access"], false);
    assert_eq!(body["is_in_trial_period"], false);
}

#[tokio::test]
async fn get_subscription_reflects_stored_record() {
    let store = Arc::new(MemoryStore::default());
    store.insert_record(yearly_record("user-1")).await;
    let app = build_app(store, Arc::new(StubPayment::default()));

    let response = app
        .router
        .oneshot(authed("GET", "/api/subscription", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["plan"], "student_yearly");
    assert_eq!(body["status"], "active");
    assert_eq!(body["has_premium_access"], true);
    assert_eq!(body["can_downgrade"], false);
    assert!(body["downgrade_available_at"].is_string());
}

// =============================================================================
// Trial
// =============================================================================

#[tokio::test]
async fn trial_request_grants_trial() {
    let app = default_app();
    let response = app
        .router
        .oneshot(authed("POST", "/api/subscription/trial", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["plan"], "trial");
    assert_eq!(body["status"], "active");
    assert_eq!(body["is_in_trial_period"], true);

    let record = app.store.record_for("user-1").await.unwrap();
    assert_eq!(record.plan, PlanType::Trial);
}

#[tokio::test]
async fn trial_request_after_latch_returns_403_with_used_at() {
    let store = Arc::new(MemoryStore::default());
    let used_at = Timestamp::now();
    store.latch_trial("user-1", used_at).await;
    let app = build_app(store, Arc::new(StubPayment::default()));

    let response = app
        .router
        .oneshot(authed("POST", "/api/subscription/trial", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "TRIAL_ALREADY_USED");
    assert!(body["trial_used_at"].is_string());
}

// =============================================================================
// Checkout / Transitions
// =============================================================================

#[tokio::test]
async fn checkout_with_unknown_price_returns_400() {
    let app = default_app();
    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/api/subscription/checkout",
            Some(json!({ "price_id": "price_bogus" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "UNKNOWN_PLAN");
}

#[tokio::test]
async fn checkout_with_no_record_creates_session() {
    let app = default_app();
    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/api/subscription/checkout",
            Some(json!({ "price_id": MONTHLY_PRICE })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["url"], "https://checkout.example.com/cs_test_1");

    let calls = app.payment.checkout_calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].price_id, MONTHLY_PRICE);
    assert_eq!(calls[0].user_id, "user-1");
}

#[tokio::test]
async fn early_downgrade_returns_403_with_open_date() {
    let store = Arc::new(MemoryStore::default());
    store.insert_record(yearly_record("user-1")).await;
    let app = build_app(store, Arc::new(StubPayment::default()));

    let response = app
        .router
        .oneshot(authed(
            "POST",
            "/api/subscription/checkout",
            Some(json!({ "price_id": MONTHLY_PRICE })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "DOWNGRADE_NOT_AVAILABLE");
    assert!(body["downgrade_available_at"].is_string());

    // No checkout session was opened
    assert!(app.payment.checkout_calls.lock().await.is_empty());
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn webhook_without_signature_returns_400() {
    let app = default_app();
    let payload = checkout_completed_event("evt_1", "sub_123", "user-1");

    let response = app
        .router
        .oneshot(webhook_request(&payload, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "MISSING_SIGNATURE");
}

#[tokio::test]
async fn webhook_with_invalid_signature_returns_400_and_writes_nothing() {
    let app = default_app();
    let payload = checkout_completed_event("evt_1", "sub_123", "user-1");
    let bad_signature = format!("t={},v1={}", chrono::Utc::now().timestamp(), "00".repeat(32));

    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&bad_signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.record_for("user-1").await.is_none());
    assert_eq!(app.events.count().await, 0);
}

#[tokio::test]
async fn signed_checkout_completed_writes_subscription() {
    let payment = Arc::new(
        StubPayment::default()
            .with_subscription(provider_subscription("sub_123", MONTHLY_PRICE))
            .await,
    );
    let app = build_app(Arc::new(MemoryStore::default()), payment);

    let payload = checkout_completed_event("evt_1", "sub_123", "user-1");
    let signature = sign_payload(&payload);

    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);

    let record = app.store.record_for("user-1").await.unwrap();
    assert_eq!(record.plan, PlanType::StudentMonthly);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.external_subscription_ref.as_deref(), Some("sub_123"));
    assert_eq!(app.events.count().await, 1);
}

#[tokio::test]
async fn duplicate_webhook_delivery_is_acknowledged_once_processed() {
    let payment = Arc::new(
        StubPayment::default()
            .with_subscription(provider_subscription("sub_123", MONTHLY_PRICE))
            .await,
    );
    let app = build_app(Arc::new(MemoryStore::default()), payment);

    let payload = checkout_completed_event("evt_1", "sub_123", "user-1");

    let first = app
        .router
        .clone()
        .oneshot(webhook_request(&payload, Some(&sign_payload(&payload))))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .router
        .oneshot(webhook_request(&payload, Some(&sign_payload(&payload))))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    // A single event record persists across redeliveries
    assert_eq!(app.events.count().await, 1);
}

#[tokio::test]
async fn signed_unknown_event_is_acknowledged_without_writes() {
    let app = default_app();
    let payload = json!({
        "id": "evt_odd",
        "type": "invoice.finalized",
        "created": chrono::Utc::now().timestamp(),
        "livemode": false,
        "data": { "object": {} }
    })
    .to_string();

    let response = app
        .router
        .oneshot(webhook_request(&payload, Some(&sign_payload(&payload))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.store.record_for("user-1").await.is_none());
}
