//! Plan catalog
//!
//! Static, compiled-in pricing table. Prices are kept in minor currency units
//! (paise) so no floating point ever touches an amount.

use serde::Serialize;

pub const FREE_PLAN_ID: &str = "free";

/// How often a plan is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Annual,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Annual => "annual",
        }
    }
}

/// Subscription plan configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: &'static str,
    pub display_name: &'static str,
    pub price_minor_units: i64,
    /// ISO 4217 currency code
    pub currency: &'static str,
    pub billing_interval: BillingInterval,
    pub features: &'static [&'static str],
}

impl Plan {
    /// The free tier has a zero price and can never be ordered
    pub fn is_paid(&self) -> bool {
        self.price_minor_units > 0
    }
}

static PLANS: [Plan; 4] = [
    Plan {
        id: FREE_PLAN_ID,
        display_name: "Free",
        price_minor_units: 0,
        currency: "INR",
        billing_interval: BillingInterval::Monthly,
        features: &["Up to 3 projects", "5 team members", "Basic kanban board"],
    },
    Plan {
        id: "starter",
        display_name: "Starter",
        price_minor_units: 19_900,
        currency: "INR",
        billing_interval: BillingInterval::Monthly,
        features: &[
            "Up to 10 projects",
            "15 team members",
            "Task filters and saved views",
        ],
    },
    Plan {
        id: "professional",
        display_name: "Professional",
        price_minor_units: 49_900,
        currency: "INR",
        billing_interval: BillingInterval::Monthly,
        features: &[
            "Unlimited projects",
            "50 team members",
            "Dashboard analytics",
            "File attachments",
        ],
    },
    Plan {
        id: "enterprise",
        display_name: "Enterprise",
        price_minor_units: 149_900,
        currency: "INR",
        billing_interval: BillingInterval::Monthly,
        features: &[
            "Unlimited projects",
            "Unlimited team members",
            "Priority support",
            "Audit log export",
        ],
    },
];

/// Look up a plan by identifier
pub fn lookup_plan(plan_id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.id == plan_id)
}

/// Every plan in display order, free tier first
pub fn all_plans() -> &'static [Plan] {
    &PLANS
}

/// The plan every cancelled organization lands on
pub fn free_plan() -> &'static Plan {
    &PLANS[0]
}
