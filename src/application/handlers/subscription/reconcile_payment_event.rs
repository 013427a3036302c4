//! Payment event reconciler.
//!
//! Applies verified provider webhook events to local state. For every
//! subscription-bearing event the authoritative object is refetched from
//! the provider; the embedded payload identifies the object but is never
//! trusted for plan or period data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    PlanCatalog, PlanType, ProviderSnapshot, StripeEvent, SubscriptionRecord, SubscriptionStatus,
    WebhookError, WebhookEventHandler,
};
use crate::ports::{PaymentProvider, SubscriptionNotifier, SubscriptionRepository};

/// Checkout session payload, reduced to the identifying fields.
#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    #[allow(dead_code)]
    id: String,
    subscription: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Subscription payload, reduced to the identifying fields.
#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

pub struct ReconcilePaymentEventHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    payment: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn SubscriptionNotifier>,
    catalog: PlanCatalog,
}

impl ReconcilePaymentEventHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        payment: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn SubscriptionNotifier>,
        catalog: PlanCatalog,
    ) -> Self {
        Self {
            subscriptions,
            payment,
            notifier,
            catalog,
        }
    }

    /// Checkout completed: the user id comes from session metadata with no
    /// fallback, and the new subscription is snapshotted from the provider.
    async fn on_checkout_completed(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let session: CheckoutSessionObject = event
            .deserialize_object()
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        let user_id = parse_user_id(session.metadata.get("user_id"))?;
        let subscription_ref = session
            .subscription
            .ok_or(WebhookError::MissingField("subscription"))?;

        self.reconcile_snapshot(user_id, &subscription_ref, true)
            .await
    }

    /// Subscription created: identical to checkout completion, with the
    /// user id read from subscription metadata.
    async fn on_subscription_created(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let object: SubscriptionObject = event
            .deserialize_object()
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        let user_id = parse_user_id(object.metadata.get("user_id"))?;
        self.reconcile_snapshot(user_id, &object.id, true).await
    }

    /// Subscription updated: subscription metadata first, customer
    /// metadata as fallback. Unattributable updates are acknowledged
    /// without action.
    async fn on_subscription_updated(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let object: SubscriptionObject = event
            .deserialize_object()
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        let user_id = match object.metadata.get("user_id") {
            Some(id) => parse_user_id(Some(id))?,
            None => match self.user_id_from_customer(object.customer.as_deref()).await? {
                Some(id) => id,
                None => {
                    return Err(WebhookError::Ignored(format!(
                        "subscription {} carries no resolvable user id",
                        object.id
                    )));
                }
            },
        };

        self.reconcile_snapshot(user_id, &object.id, false).await
    }

    /// Subscription deleted: remove the local row and reset the profile
    /// mirror. Idempotent when the row is already gone.
    async fn on_subscription_deleted(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let object: SubscriptionObject = event
            .deserialize_object()
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        let record = match self
            .subscriptions
            .find_by_subscription_ref(&object.id)
            .await?
        {
            Some(record) => record,
            None => {
                return Err(WebhookError::Ignored(format!(
                    "no local record for deleted subscription {}",
                    object.id
                )));
            }
        };

        self.subscriptions
            .delete_with_profile_reset(&record.user_id)
            .await?;

        tracing::info!(
            user_id = %record.user_id,
            subscription_ref = %object.id,
            "subscription deleted, local record removed"
        );

        self.notifier.notify(&record.user_id).await;
        Ok(())
    }

    /// Fetches the authoritative subscription and upserts the local record
    /// with the profile mirror.
    ///
    /// With `guard_downgrade` set (creation events), a new monthly
    /// subscription arriving while the local record still holds an unspent
    /// yearly period is rejected: the new provider subscription is
    /// canceled and no local write happens.
    async fn reconcile_snapshot(
        &self,
        user_id: UserId,
        subscription_ref: &str,
        guard_downgrade: bool,
    ) -> Result<(), WebhookError> {
        let now = Timestamp::now();

        // 1. Authoritative snapshot from the provider
        let provider_sub = self
            .payment
            .get_subscription(subscription_ref)
            .await
            .map_err(|e| WebhookError::Provider(e.to_string()))?
            .ok_or_else(|| {
                // Possibly eventual consistency at the provider; retry
                WebhookError::Provider(format!(
                    "subscription {} not found at provider",
                    subscription_ref
                ))
            })?;

        // 2. Plan from the price id
        let price_id = provider_sub
            .price_id
            .clone()
            .ok_or(WebhookError::MissingField("price"))?;
        let plan = self.catalog.plan_for_price(&price_id).ok_or_else(|| {
            WebhookError::ParseError(format!("unknown price id {}", price_id))
        })?;

        let current = self.subscriptions.find_by_user_id(&user_id).await?;

        // 3. Premature-downgrade guard
        if guard_downgrade {
            if let Some(current) = &current {
                if self.is_premature_downgrade(current, plan, subscription_ref, now) {
                    tracing::warn!(
                        user_id = %user_id,
                        subscription_ref,
                        "premature yearly-to-monthly downgrade, canceling new subscription"
                    );
                    match self.payment.cancel_subscription(subscription_ref, false).await {
                        Ok(()) => {}
                        Err(e) if e.is_resource_missing() => {}
                        Err(e) => return Err(WebhookError::Provider(e.to_string())),
                    }
                    return Err(WebhookError::Ignored(
                        "premature downgrade rejected; new subscription canceled".to_string(),
                    ));
                }
            }
        }

        // 4. Apply the snapshot
        let snapshot = ProviderSnapshot {
            plan,
            status: SubscriptionStatus::from_provider(&provider_sub.status),
            current_period_end: provider_sub.current_period_end.map(Timestamp::from_unix_secs),
            cancel_at_period_end: provider_sub.cancel_at_period_end,
            customer_ref: provider_sub.customer_id.clone(),
            subscription_ref: provider_sub.id.clone(),
        };

        let record = match current {
            Some(mut record) => {
                let ended_trial = record.apply_provider_snapshot(snapshot, now);
                if ended_trial {
                    tracing::info!(user_id = %user_id, plan = %plan, "trial converted to paid plan");
                }
                record
            }
            None => SubscriptionRecord::from_provider_snapshot(user_id.clone(), snapshot, now),
        };

        self.subscriptions.upsert_with_profile(&record).await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            status = %record.status,
            "subscription reconciled from payment event"
        );

        self.notifier.notify(&user_id).await;
        Ok(())
    }

    fn is_premature_downgrade(
        &self,
        current: &SubscriptionRecord,
        incoming_plan: PlanType,
        incoming_ref: &str,
        now: Timestamp,
    ) -> bool {
        current.plan == PlanType::StudentYearly
            && incoming_plan == PlanType::StudentMonthly
            && current.external_subscription_ref.as_deref() != Some(incoming_ref)
            && current
                .current_period_end
                .map(|end| end.is_after(&now))
                .unwrap_or(false)
    }

    async fn user_id_from_customer(
        &self,
        customer_ref: Option<&str>,
    ) -> Result<Option<UserId>, WebhookError> {
        let customer_ref = match customer_ref {
            Some(r) => r,
            None => return Ok(None),
        };
        let customer = self
            .payment
            .get_customer(customer_ref)
            .await
            .map_err(|e| WebhookError::Provider(e.to_string()))?;
        match customer.and_then(|c| c.user_id().map(String::from)) {
            Some(id) => Ok(Some(
                UserId::new(id).map_err(|_| WebhookError::MissingMetadata("user_id"))?,
            )),
            None => Ok(None),
        }
    }
}

fn parse_user_id(raw: Option<&String>) -> Result<UserId, WebhookError> {
    let raw = raw.ok_or(WebhookError::MissingMetadata("user_id"))?;
    UserId::new(raw.clone()).map_err(|_| WebhookError::MissingMetadata("user_id"))
}

#[async_trait]
impl WebhookEventHandler for ReconcilePaymentEventHandler {
    async fn handle(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        use crate::domain::subscription::StripeEventType::*;

        match event.parsed_type() {
            CheckoutSessionCompleted => self.on_checkout_completed(event).await,
            CustomerSubscriptionCreated => self.on_subscription_created(event).await,
            CustomerSubscriptionUpdated => self.on_subscription_updated(event).await,
            CustomerSubscriptionDeleted => self.on_subscription_deleted(event).await,
            kind if kind.is_log_only() => {
                tracing::debug!(event_type = %event.event_type, "customer event observed");
                Err(WebhookError::Ignored(format!(
                    "log-only event {}",
                    event.event_type
                )))
            }
            _ => Err(WebhookError::Ignored(format!(
                "unhandled event type {}",
                event.event_type
            ))),
        }
    }
}
