//! Storage seam for organizations, memberships and the payment ledger

mod memory;
mod postgres;

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use serde::Serialize;
use tasklane_shared::{MemberRole, SubscriptionStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::ledger::{LedgerEntry, PaymentRecord};

/// Billing view of an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationBilling {
    pub id: Uuid,
    pub current_plan_id: String,
    pub subscription_status: SubscriptionStatus,
    pub billing_customer_ref: Option<String>,
    pub subscription_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
}

impl OrganizationBilling {
    /// A fresh organization on the free tier
    pub fn free(id: Uuid) -> Self {
        Self {
            id,
            current_plan_id: crate::plans::FREE_PLAN_ID.to_string(),
            subscription_status: SubscriptionStatus::None,
            billing_customer_ref: None,
            subscription_ref: None,
            trial_ends_at: None,
        }
    }

    /// True when an order for `plan_id` would bill for a no-op upgrade
    pub fn is_active_on(&self, plan_id: &str) -> bool {
        self.subscription_status == SubscriptionStatus::Active && self.current_plan_id == plan_id
    }

    /// True when an active subscription from a different order is in place
    pub fn has_other_active_subscription(&self, subscription_ref: &str) -> bool {
        self.subscription_status == SubscriptionStatus::Active
            && self.subscription_ref.as_deref() != Some(subscription_ref)
    }
}

/// Target state written when a captured payment is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionActivation {
    pub plan_id: String,
    /// Gateway payment id
    pub billing_customer_ref: String,
    /// Gateway order id
    pub subscription_ref: String,
}

impl SubscriptionActivation {
    /// The payment id becomes the customer ref, the order id the subscription ref
    pub fn from_payment(plan_id: &str, external_order_id: &str, external_payment_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            billing_customer_ref: external_payment_id.to_string(),
            subscription_ref: external_order_id.to_string(),
        }
    }
}

/// Persistence used by the billing core.
///
/// Implementations must make `upsert_payment` and `claim_payment` single
/// atomic operations on the `(org_id, external_payment_id)` key. Through
/// `upsert_payment` a `success` row never changes status, and a `processing`
/// row only moves to `processing` or `success`.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn get_member_role(&self, org_id: Uuid, user_id: Uuid)
        -> BillingResult<Option<MemberRole>>;

    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<OrganizationBilling>>;

    /// Single-row update; sets `trial_ends_at` to null
    async fn activate_subscription(
        &self,
        org_id: Uuid,
        activation: &SubscriptionActivation,
    ) -> BillingResult<()>;

    /// Move the organization to the free tier with status `cancelled`
    async fn cancel_subscription(&self, org_id: Uuid) -> BillingResult<()>;

    async fn find_payment(
        &self,
        org_id: Uuid,
        external_payment_id: &str,
    ) -> BillingResult<Option<PaymentRecord>>;

    async fn get_payment(&self, org_id: Uuid, record_id: Uuid)
        -> BillingResult<Option<PaymentRecord>>;

    /// Insert or update by `(org_id, external_payment_id)`, merging metadata
    async fn upsert_payment(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord>;

    /// Insert or move the row to `processing` with no failure reason.
    ///
    /// Only an absent row, a `failed` or `pending` row, or a `processing` row
    /// whose organization write failed can be claimed. Returns `None` when the
    /// row is `success` or already claimed.
    async fn claim_payment(&self, entry: &LedgerEntry) -> BillingResult<Option<PaymentRecord>>;

    /// Insert a row that has no external payment id
    async fn append_payment(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord>;

    /// Most recent first
    async fn list_payments(&self, org_id: Uuid) -> BillingResult<Vec<PaymentRecord>>;
}
