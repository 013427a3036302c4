//! Plan transition engine.
//!
//! Evaluates the pure decision table, then executes whichever provider
//! action it calls for: a hosted checkout session for fresh purchases, or
//! an in-place price update for plan switches on a live subscription.

use std::sync::Arc;

use crate::domain::foundation::{AuthenticatedUser, Timestamp, UserId};
use crate::domain::subscription::{
    decide, PlanCatalog, PlanType, SubscriptionError, SubscriptionRecord, TransitionDecision,
};
use crate::ports::{
    CheckoutSessionRequest, PaymentProvider, ProrationBehavior, SubscriptionNotifier,
    SubscriptionRepository,
};

/// Command to move the user to the plan behind a provider price id.
#[derive(Debug, Clone)]
pub struct RequestTransitionCommand {
    pub user: AuthenticatedUser,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// What the transition produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The user must complete checkout at this URL. No local state was
    /// written; the reconciler writes when the completion event arrives.
    CheckoutCreated { url: String },
    /// The provider subscription was moved to the new plan and the local
    /// record updated.
    PlanUpdated { plan: PlanType },
    /// The user already holds the requested plan.
    AlreadyOnPlan { plan: PlanType },
}

pub struct RequestTransitionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    payment: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn SubscriptionNotifier>,
    catalog: PlanCatalog,
}

impl RequestTransitionHandler {
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

    pub async fn handle(
        &self,
        command: RequestTransitionCommand,
    ) -> Result<TransitionOutcome, SubscriptionError> {
        // 1. Resolve the target plan from the price id
        let target = self
            .catalog
            .plan_for_price(&command.price_id)
            .ok_or_else(|| SubscriptionError::unknown_plan(&command.price_id))?;

        // 2. Evaluate the decision table against the current record
        let record = self.subscriptions.find_by_user_id(&command.user.id).await?;
        match decide(record.as_ref(), target) {
            TransitionDecision::AlreadyOnPlan => {
                Ok(TransitionOutcome::AlreadyOnPlan { plan: target })
            }
            TransitionDecision::NotAutomated => {
                Err(SubscriptionError::PlanNotAutomated { plan: target })
            }
            TransitionDecision::NotPurchasable => Err(SubscriptionError::unknown_plan(format!(
                "{} cannot be purchased",
                target
            ))),
            TransitionDecision::DowngradeNotYet { available_at } => {
                Err(SubscriptionError::downgrade_not_available(available_at))
            }
            TransitionDecision::StartCheckout => {
                self.start_checkout(&command, record.as_ref()).await
            }
            TransitionDecision::UpdateInPlace { prorate } => {
                // decide() only returns UpdateInPlace for live records
                let record = record.ok_or_else(|| {
                    SubscriptionError::invalid_state("no record for in-place update")
                })?;
                self.update_in_place(&command.user.id, record, target, prorate)
                    .await
            }
        }
    }

    /// Opens a hosted checkout session, reusing the provider customer when
    /// one can be found and backfilling its user-id metadata.
    async fn start_checkout(
        &self,
        command: &RequestTransitionCommand,
        record: Option<&SubscriptionRecord>,
    ) -> Result<TransitionOutcome, SubscriptionError> {
        let customer_id = self.resolve_customer(command, record).await?;

        let session = self
            .payment
            .create_checkout_session(CheckoutSessionRequest {
                customer_id,
                customer_email: command.user.email.clone(),
                price_id: command.price_id.clone(),
                user_id: command.user.id.as_str().to_string(),
                success_url: command.success_url.clone(),
                cancel_url: command.cancel_url.clone(),
            })
            .await?;

        let url = session
            .url
            .ok_or_else(|| SubscriptionError::provider("checkout session has no URL"))?;

        tracing::info!(
            user_id = %command.user.id,
            session_id = %session.id,
            "checkout session created"
        );

        Ok(TransitionOutcome::CheckoutCreated { url })
    }

    /// Picks the provider customer for checkout: the stored reference if
    /// it still exists, otherwise a lookup by the authenticated email.
    async fn resolve_customer(
        &self,
        command: &RequestTransitionCommand,
        record: Option<&SubscriptionRecord>,
    ) -> Result<Option<String>, SubscriptionError> {
        if let Some(stored_ref) = record.and_then(|r| r.external_customer_ref.as_deref()) {
            if let Some(customer) = self.payment.get_customer(stored_ref).await? {
                if !customer.deleted {
                    if customer.user_id().is_none() {
                        self.payment
                            .set_customer_user_id(&customer.id, command.user.id.as_str())
                            .await?;
                    }
                    return Ok(Some(customer.id));
                }
            }
            tracing::warn!(
                user_id = %command.user.id,
                customer_ref = stored_ref,
                "stored customer reference is stale, falling back to email lookup"
            );
        }

        if let Some(email) = command.user.email.as_deref() {
            if let Some(customer) = self.payment.find_customer_by_email(email).await? {
                if customer.user_id().is_none() {
                    self.payment
                        .set_customer_user_id(&customer.id, command.user.id.as_str())
                        .await?;
                }
                return Ok(Some(customer.id));
            }
        }

        // No existing customer; the provider creates one from the email.
        Ok(None)
    }

    /// Moves the live provider subscription to the target price and writes
    /// the local record. The item id is read back from the provider first;
    /// price updates address the item, not the subscription.
    async fn update_in_place(
        &self,
        user_id: &UserId,
        mut record: SubscriptionRecord,
        target: PlanType,
        prorate: bool,
    ) -> Result<TransitionOutcome, SubscriptionError> {
        let subscription_ref = record
            .external_subscription_ref
            .clone()
            .ok_or_else(|| SubscriptionError::invalid_state("no provider subscription"))?;

        // 1. Read-then-write: fetch the current item id
        let provider_sub = self
            .payment
            .get_subscription(&subscription_ref)
            .await?
            .ok_or_else(|| {
                SubscriptionError::invalid_state("provider subscription no longer exists")
            })?;
        let item_id = provider_sub
            .item_id
            .ok_or_else(|| SubscriptionError::provider("subscription has no item"))?;

        let price_id = self
            .catalog
            .price_for_plan(target)
            .ok_or_else(|| SubscriptionError::unknown_plan(target.as_str()))?;

        // 2. Update the item at the provider
        let proration = if prorate {
            ProrationBehavior::CreateProrations
        } else {
            ProrationBehavior::None
        };
        let updated = self
            .payment
            .update_subscription_item(&subscription_ref, &item_id, price_id, proration)
            .await?;

        // 3. Persist locally with the mirror
        let now = Timestamp::now();
        record.current_period_end = updated
            .current_period_end
            .map(Timestamp::from_unix_secs)
            .or(record.current_period_end);
        record.change_plan(target, now);
        self.subscriptions.upsert_with_profile(&record).await?;

        tracing::info!(
            user_id = %user_id,
            plan = %target,
            prorated = prorate,
            "subscription plan updated in place"
        );

        self.notifier.notify(user_id).await;

        Ok(TransitionOutcome::PlanUpdated { plan: target })
    }
}
