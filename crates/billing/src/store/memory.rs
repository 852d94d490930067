//! In-memory billing store for tests and local development

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tasklane_shared::{MemberRole, SubscriptionStatus};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BillingStore, OrganizationBilling, SubscriptionActivation};
use crate::error::{BillingError, BillingResult};
use crate::ledger::{merge_metadata, FailureReason, LedgerEntry, PaymentRecord, PaymentStatus};

/// Map-backed store.
///
/// Organization writes and ledger success writes can be made to fail on
/// demand to exercise the reconciliation paths.
#[derive(Default)]
pub struct InMemoryBillingStore {
    organizations: RwLock<HashMap<Uuid, OrganizationBilling>>,
    members: RwLock<HashMap<(Uuid, Uuid), MemberRole>>,
    /// Insertion order is kept so equal timestamps still list newest first
    payments: RwLock<Vec<PaymentRecord>>,
    fail_org_writes: AtomicBool,
    fail_success_writes: AtomicBool,
    org_writes: AtomicUsize,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_organization(&self, org: OrganizationBilling) {
        self.organizations.write().await.insert(org.id, org);
    }

    pub async fn add_member(&self, org_id: Uuid, user_id: Uuid, role: MemberRole) {
        self.members.write().await.insert((org_id, user_id), role);
    }

    pub async fn organization(&self, org_id: Uuid) -> Option<OrganizationBilling> {
        self.organizations.read().await.get(&org_id).cloned()
    }

    /// Every ledger row, oldest first
    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.payments.read().await.clone()
    }

    /// Insert a row as-is, bypassing upsert rules (seeds legacy data)
    pub async fn seed_payment(&self, record: PaymentRecord) {
        self.payments.write().await.push(record);
    }

    pub fn set_fail_org_writes(&self, fail: bool) {
        self.fail_org_writes.store(fail, Ordering::SeqCst);
    }

    /// Make upserts that would mark a row `success` fail
    pub fn set_fail_success_writes(&self, fail: bool) {
        self.fail_success_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful organization writes so far
    pub fn org_write_count(&self) -> usize {
        self.org_writes.load(Ordering::SeqCst)
    }

    fn check_org_writes(&self) -> BillingResult<()> {
        if self.fail_org_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database(
                "organization store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Same rule as the Postgres conflict guard
    fn upsert_replaces(existing: PaymentStatus, incoming: PaymentStatus) -> bool {
        match (existing, incoming) {
            (_, PaymentStatus::Success) => true,
            (PaymentStatus::Success, _) => false,
            (PaymentStatus::Processing, incoming) => incoming == PaymentStatus::Processing,
            _ => true,
        }
    }

    fn claimable(row: &PaymentRecord) -> bool {
        match row.status {
            PaymentStatus::Failed | PaymentStatus::Pending => true,
            PaymentStatus::Processing => row.failure_reason == Some(FailureReason::OrgWriteFailed),
            PaymentStatus::Success | PaymentStatus::Cancelled => false,
        }
    }

    fn apply(row: &mut PaymentRecord, entry: &LedgerEntry) {
        row.status = entry.status;
        row.failure_reason = entry.failure_reason;
        row.amount_minor_units = entry.amount_minor_units;
        row.currency = entry.currency.clone();
        row.plan_id = entry.plan_id.clone();
        if entry.external_order_id.is_some() {
            row.external_order_id = entry.external_order_id.clone();
        }
        merge_metadata(&mut row.metadata, &entry.metadata);
        row.updated_at = OffsetDateTime::now_utc();
    }

    fn new_record(entry: &LedgerEntry) -> PaymentRecord {
        let now = OffsetDateTime::now_utc();
        PaymentRecord {
            id: Uuid::new_v4(),
            org_id: entry.org_id,
            user_id: entry.user_id,
            amount_minor_units: entry.amount_minor_units,
            currency: entry.currency.clone(),
            external_payment_id: entry.external_payment_id.clone(),
            external_order_id: entry.external_order_id.clone(),
            status: entry.status,
            plan_id: entry.plan_id.clone(),
            failure_reason: entry.failure_reason,
            metadata: entry.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn get_member_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> BillingResult<Option<MemberRole>> {
        Ok(self.members.read().await.get(&(org_id, user_id)).copied())
    }

    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<OrganizationBilling>> {
        Ok(self.organizations.read().await.get(&org_id).cloned())
    }

    async fn activate_subscription(
        &self,
        org_id: Uuid,
        activation: &SubscriptionActivation,
    ) -> BillingResult<()> {
        self.check_org_writes()?;

        let mut orgs = self.organizations.write().await;
        let org = orgs
            .get_mut(&org_id)
            .ok_or_else(|| BillingError::NotFound(format!("Organization {} not found", org_id)))?;

        org.current_plan_id = activation.plan_id.clone();
        org.subscription_status = SubscriptionStatus::Active;
        org.billing_customer_ref = Some(activation.billing_customer_ref.clone());
        org.subscription_ref = Some(activation.subscription_ref.clone());
        org.trial_ends_at = None;

        self.org_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_subscription(&self, org_id: Uuid) -> BillingResult<()> {
        self.check_org_writes()?;

        let mut orgs = self.organizations.write().await;
        let org = orgs
            .get_mut(&org_id)
            .ok_or_else(|| BillingError::NotFound(format!("Organization {} not found", org_id)))?;

        org.current_plan_id = crate::plans::FREE_PLAN_ID.to_string();
        org.subscription_status = SubscriptionStatus::Cancelled;
        org.subscription_ref = None;

        self.org_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_payment(
        &self,
        org_id: Uuid,
        external_payment_id: &str,
    ) -> BillingResult<Option<PaymentRecord>> {
        Ok(self
            .payments
            .read()
            .await
            .iter()
            .find(|p| {
                p.org_id == org_id && p.external_payment_id.as_deref() == Some(external_payment_id)
            })
            .cloned())
    }

    async fn get_payment(
        &self,
        org_id: Uuid,
        record_id: Uuid,
    ) -> BillingResult<Option<PaymentRecord>> {
        Ok(self
            .payments
            .read()
            .await
            .iter()
            .find(|p| p.org_id == org_id && p.id == record_id)
            .cloned())
    }

    async fn upsert_payment(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord> {
        let external_payment_id = entry.external_payment_id.as_deref().ok_or_else(|| {
            BillingError::Internal("upsert_payment requires an external payment id".to_string())
        })?;
        if entry.status == PaymentStatus::Success
            && self.fail_success_writes.load(Ordering::SeqCst)
        {
            return Err(BillingError::Database(
                "payment ledger unavailable".to_string(),
            ));
        }

        // The write lock is held across lookup and write, like a unique-index upsert
        let mut payments = self.payments.write().await;
        let existing = payments.iter_mut().find(|p| {
            p.org_id == entry.org_id
                && p.external_payment_id.as_deref() == Some(external_payment_id)
        });

        match existing {
            Some(row) => {
                if Self::upsert_replaces(row.status, entry.status) {
                    Self::apply(row, entry);
                }
                Ok(row.clone())
            }
            None => {
                let record = Self::new_record(entry);
                payments.push(record.clone());
                Ok(record)
            }
        }
    }

    async fn claim_payment(&self, entry: &LedgerEntry) -> BillingResult<Option<PaymentRecord>> {
        let external_payment_id = entry.external_payment_id.as_deref().ok_or_else(|| {
            BillingError::Internal("claim_payment requires an external payment id".to_string())
        })?;

        let mut claimed = entry.clone();
        claimed.status = PaymentStatus::Processing;
        claimed.failure_reason = None;

        let mut payments = self.payments.write().await;
        let existing = payments.iter_mut().find(|p| {
            p.org_id == entry.org_id
                && p.external_payment_id.as_deref() == Some(external_payment_id)
        });

        match existing {
            Some(row) => {
                if !Self::claimable(row) {
                    return Ok(None);
                }
                Self::apply(row, &claimed);
                Ok(Some(row.clone()))
            }
            None => {
                let record = Self::new_record(&claimed);
                payments.push(record.clone());
                Ok(Some(record))
            }
        }
    }

    async fn append_payment(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord> {
        let record = Self::new_record(entry);
        self.payments.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_payments(&self, org_id: Uuid) -> BillingResult<Vec<PaymentRecord>> {
        let mut records: Vec<PaymentRecord> = self
            .payments
            .read()
            .await
            .iter()
            .rev()
            .filter(|p| p.org_id == org_id)
            .cloned()
            .collect();
        // Stable sort keeps newer inserts first among equal timestamps
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
