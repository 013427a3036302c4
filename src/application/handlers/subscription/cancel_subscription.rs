//! Subscription cancellation.
//!
//! Yearly plans cancel at the period end so the paid year runs out;
//! everything else cancels immediately. A subscription the provider no
//! longer knows about is treated as already terminated, and repeating a
//! cancellation never errors.

use std::sync::Arc;

use crate::domain::foundation::{AuthenticatedUser, Timestamp};
use crate::domain::subscription::{PlanType, SubscriptionError, SubscriptionStatus};
use crate::ports::{PaymentProvider, SubscriptionNotifier, SubscriptionRepository};

#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user: AuthenticatedUser,
}

/// Result of a cancellation request. Every variant is a success from the
/// caller's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum CancellationOutcome {
    /// Access continues until the period end, then the subscription ends.
    ScheduledAtPeriodEnd {
        period_end: Option<Timestamp>,
        message: String,
    },
    /// The subscription was canceled immediately.
    CanceledImmediately { message: String },
    /// Nothing was left to cancel.
    AlreadyInactive { message: String },
}

pub struct CancelSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    payment: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn SubscriptionNotifier>,
}

impl CancelSubscriptionHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        payment: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn SubscriptionNotifier>,
    ) -> Self {
        Self {
            subscriptions,
            payment,
            notifier,
        }
    }

    pub async fn handle(
        &self,
        command: CancelSubscriptionCommand,
    ) -> Result<CancellationOutcome, SubscriptionError> {
        let user_id = command.user.id.clone();
        let now = Timestamp::now();

        // 1. Load the record
        let mut record = self
            .subscriptions
            .find_by_user_id(&user_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found_for_user(user_id.as_str()))?;

        // 2. Re-entrancy: repeating a cancellation is not an error
        if record.cancel_at_period_end {
            return Ok(CancellationOutcome::ScheduledAtPeriodEnd {
                period_end: record.current_period_end,
                message: scheduled_message(record.current_period_end),
            });
        }
        if matches!(
            record.status,
            SubscriptionStatus::Canceled | SubscriptionStatus::Inactive
        ) {
            return Ok(CancellationOutcome::AlreadyInactive {
                message: "Subscription is not active.".to_string(),
            });
        }

        // 3. Rows without a provider subscription (trials) cancel locally
        let subscription_ref = match record.external_subscription_ref.clone() {
            Some(r) => r,
            None => {
                record.cancel_now(now).map_err(SubscriptionError::from)?;
                self.subscriptions.upsert_with_profile(&record).await?;
                self.notifier.notify(&user_id).await;
                return Ok(CancellationOutcome::CanceledImmediately {
                    message: "Subscription canceled. Access ends immediately.".to_string(),
                });
            }
        };

        // 4. An incomplete_expired subscription is already gone upstream
        if record.status == SubscriptionStatus::IncompleteExpired {
            record.mark_inactive(now);
            self.subscriptions.upsert_with_profile(&record).await?;
            self.notifier.notify(&user_id).await;
            return Ok(CancellationOutcome::AlreadyInactive {
                message: "Subscription was never completed and has been closed.".to_string(),
            });
        }

        // 5. Cancel upstream: yearly at period end, everything else now
        let at_period_end = record.plan == PlanType::StudentYearly;
        match self
            .payment
            .cancel_subscription(&subscription_ref, at_period_end)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_resource_missing() => {
                // The provider object is gone; reflect that and succeed
                tracing::warn!(
                    user_id = %user_id,
                    subscription_ref = %subscription_ref,
                    "provider subscription missing during cancel, marking inactive"
                );
                record.mark_inactive(now);
                self.subscriptions.upsert_with_profile(&record).await?;
                self.notifier.notify(&user_id).await;
                return Ok(CancellationOutcome::AlreadyInactive {
                    message: "Subscription was already removed.".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        // 6. Persist the local outcome with the profile mirror
        let outcome = if at_period_end {
            record.schedule_cancellation(now);
            CancellationOutcome::ScheduledAtPeriodEnd {
                period_end: record.current_period_end,
                message: scheduled_message(record.current_period_end),
            }
        } else {
            record.cancel_now(now).map_err(SubscriptionError::from)?;
            CancellationOutcome::CanceledImmediately {
                message: "Subscription canceled. Access ends immediately.".to_string(),
            }
        };
        self.subscriptions.upsert_with_profile(&record).await?;

        tracing::info!(
            user_id = %user_id,
            at_period_end,
            "subscription canceled"
        );

        self.notifier.notify(&user_id).await;
        Ok(outcome)
    }
}

fn scheduled_message(period_end: Option<Timestamp>) -> String {
    match period_end {
        Some(end) => format!(
            "Subscription will cancel on {}. You keep access until then.",
            end.format_long_date()
        ),
        None => "Subscription will cancel at the end of the current period.".to_string(),
    }
}
