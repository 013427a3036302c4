//! Subscription plans and the price-id catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The plans a subscription record can carry.
///
/// `Free` is the implicit default for users without a paid record.
/// `Classroom` is sold through sales, never through self-serve checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Free,
    Trial,
    StudentMonthly,
    StudentYearly,
    Classroom,
}

impl PlanType {
    /// True for plans billed through the payment provider.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            PlanType::StudentMonthly | PlanType::StudentYearly | PlanType::Classroom
        )
    }

    /// True for plans a user can buy through self-serve checkout.
    pub fn is_self_serve(&self) -> bool {
        matches!(self, PlanType::StudentMonthly | PlanType::StudentYearly)
    }

    /// Storage representation, also used in API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Trial => "trial",
            PlanType::StudentMonthly => "student_monthly",
            PlanType::StudentYearly => "student_yearly",
            PlanType::Classroom => "classroom",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanType::Free),
            "trial" => Some(PlanType::Trial),
            "student_monthly" => Some(PlanType::StudentMonthly),
            "student_yearly" => Some(PlanType::StudentYearly),
            "classroom" => Some(PlanType::Classroom),
            _ => None,
        }
    }

    /// Human-readable name used in API error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlanType::Free => "Free",
            PlanType::Trial => "Free Trial",
            PlanType::StudentMonthly => "Student",
            PlanType::StudentYearly => "Student (Yearly)",
            PlanType::Classroom => "Classroom",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maps provider price ids to plans.
///
/// Price ids come from configuration so test and live environments can
/// point at different provider products.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    monthly_price_id: String,
    yearly_price_id: String,
}

impl PlanCatalog {
    pub fn new(monthly_price_id: impl Into<String>, yearly_price_id: impl Into<String>) -> Self {
        Self {
            monthly_price_id: monthly_price_id.into(),
            yearly_price_id: yearly_price_id.into(),
        }
    }

    /// Resolves a provider price id to a plan. Unknown ids return None;
    /// callers treat that as a hard error rather than guessing.
    pub fn plan_for_price(&self, price_id: &str) -> Option<PlanType> {
        if price_id == self.monthly_price_id {
            Some(PlanType::StudentMonthly)
        } else if price_id == self.yearly_price_id {
            Some(PlanType::StudentYearly)
        } else {
            None
        }
    }

    /// Resolves a plan to its provider price id, for self-serve plans only.
    pub fn price_for_plan(&self, plan: PlanType) -> Option<&str> {
        match plan {
            PlanType::StudentMonthly => Some(&self.monthly_price_id),
            PlanType::StudentYearly => Some(&self.yearly_price_id),
            _ => None,
        }
    }
}
