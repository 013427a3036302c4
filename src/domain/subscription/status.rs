//! Subscription status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::StateMachine;

/// Lifecycle status of a subscription record.
///
/// Mirrors the payment provider's subscription statuses plus `Inactive`,
/// which marks rows whose provider object no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Inactive,
}

impl SubscriptionStatus {
    /// True when the status grants access to paid content.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    /// Parses the storage representation. Also accepts the provider's
    /// status strings, which use the same spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "inactive" => Some(SubscriptionStatus::Inactive),
            _ => None,
        }
    }

    /// Maps a provider status string, folding statuses this system does
    /// not track (paused, unpaid) into `Inactive`.
    pub fn from_provider(s: &str) -> Self {
        Self::parse(s).unwrap_or(SubscriptionStatus::Inactive)
    }
}

/// Transitions initiated locally (trial grant, cancellation, expiry).
///
/// Snapshots from the payment event reconciler bypass this table: the
/// provider is authoritative and its statuses are applied directly via
/// `SubscriptionRecord::apply_provider_snapshot`.
impl SubscriptionStatus {
    fn local_targets(&self) -> &'static [SubscriptionStatus] {
        use SubscriptionStatus::*;
        match self {
            Active => &[PastDue, Canceled, Inactive],
            Trialing => &[Active, Canceled, Inactive],
            PastDue => &[Active, Canceled, Inactive],
            Canceled => &[Inactive],
            Incomplete => &[Active, IncompleteExpired, Canceled],
            IncompleteExpired => &[Inactive],
            Inactive => &[Trialing, Active, Incomplete],
        }
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.local_targets().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        self.local_targets().to_vec()
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
