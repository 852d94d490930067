//! Payment ledger
//!
//! One row per distinct external payment attempt, keyed per organization by
//! the gateway's payment id. The ledger is both the audit trail and the
//! idempotency store: a `success` row means the money has been applied.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::Plan;
use crate::store::BillingStore;

/// Status of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Written by other tooling only; accepted when reading
    Pending,
    Success,
    Failed,
    /// Captured at the gateway but not yet applied to the organization
    Processing,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Rows the recovery operator is allowed to look at
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Processing)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            "processing" => Ok(PaymentStatus::Processing),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(BillingError::Internal(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Why a payment attempt did not reach `success`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// HMAC over `order_id|payment_id` did not match
    SignatureInvalid,
    /// The gateway could not be asked about the payment
    GatewayRejected,
    /// The gateway reports the payment as anything other than captured
    NotCaptured,
    /// Money moved, the organization write did not
    OrgWriteFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::SignatureInvalid => "signature_invalid",
            FailureReason::GatewayRejected => "gateway_rejected",
            FailureReason::NotCaptured => "not_captured",
            FailureReason::OrgWriteFailed => "org_write_failed",
        }
    }

    /// Only an organization write failure can be healed without a new payment
    pub fn requires_new_payment(&self) -> bool {
        !matches!(self, FailureReason::OrgWriteFailed)
    }

    /// Classify rows written before `failure_reason` became a column.
    ///
    /// Older rows only carry boolean markers in `metadata`.
    pub fn from_legacy_metadata(metadata: &Value) -> Option<Self> {
        let flag = |key: &str| metadata.get(key).and_then(Value::as_bool).unwrap_or(false);

        if flag("verification_failed") || flag("razorpay_verification_failed") {
            Some(FailureReason::SignatureInvalid)
        } else if flag("gateway_fetch_failed") {
            Some(FailureReason::GatewayRejected)
        } else if flag("org_update_failed") {
            Some(FailureReason::OrgWriteFailed)
        } else {
            None
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signature_invalid" => Ok(FailureReason::SignatureInvalid),
            "gateway_rejected" => Ok(FailureReason::GatewayRejected),
            "not_captured" => Ok(FailureReason::NotCaptured),
            "org_write_failed" => Ok(FailureReason::OrgWriteFailed),
            other => Err(BillingError::Internal(format!(
                "Unknown failure reason '{}'",
                other
            ))),
        }
    }
}

/// A stored ledger row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    pub external_payment_id: Option<String>,
    pub external_order_id: Option<String>,
    pub status: PaymentStatus,
    pub plan_id: String,
    pub failure_reason: Option<FailureReason>,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PaymentRecord {
    /// The typed failure reason, falling back to legacy metadata markers
    pub fn effective_failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
            .or_else(|| FailureReason::from_legacy_metadata(&self.metadata))
    }
}

/// A ledger write, before it has an id
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    pub external_payment_id: Option<String>,
    pub external_order_id: Option<String>,
    pub status: PaymentStatus,
    pub plan_id: String,
    pub failure_reason: Option<FailureReason>,
    pub metadata: Value,
}

impl LedgerEntry {
    /// Entry for a payment attempt against `plan`, still pending
    pub fn payment_attempt(
        org_id: Uuid,
        user_id: Uuid,
        plan: &Plan,
        external_order_id: &str,
        external_payment_id: &str,
    ) -> Self {
        Self {
            org_id,
            user_id,
            amount_minor_units: plan.price_minor_units,
            currency: plan.currency.to_string(),
            external_payment_id: Some(external_payment_id.to_string()),
            external_order_id: Some(external_order_id.to_string()),
            status: PaymentStatus::Pending,
            plan_id: plan.id.to_string(),
            failure_reason: None,
            metadata: json!({}),
        }
    }

    /// Zero-amount entry recording a downgrade to the free tier
    pub fn cancellation(
        org_id: Uuid,
        user_id: Uuid,
        previous_plan_id: &str,
        previous_subscription_ref: Option<&str>,
        currency: &str,
    ) -> Self {
        Self {
            org_id,
            user_id,
            amount_minor_units: 0,
            currency: currency.to_string(),
            external_payment_id: None,
            external_order_id: None,
            status: PaymentStatus::Cancelled,
            plan_id: crate::plans::FREE_PLAN_ID.to_string(),
            failure_reason: None,
            metadata: json!({
                "previous_plan": previous_plan_id,
                "previous_subscription_ref": previous_subscription_ref,
                "cancelled_at": now_rfc3339(),
            }),
        }
    }

    /// Rebuild the write key of an existing row
    pub fn from_record(record: &PaymentRecord) -> Self {
        Self {
            org_id: record.org_id,
            user_id: record.user_id,
            amount_minor_units: record.amount_minor_units,
            currency: record.currency.clone(),
            external_payment_id: record.external_payment_id.clone(),
            external_order_id: record.external_order_id.clone(),
            status: record.status,
            plan_id: record.plan_id.clone(),
            failure_reason: record.failure_reason,
            metadata: json!({}),
        }
    }

    pub fn failed(mut self, reason: FailureReason, metadata: Value) -> Self {
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason);
        self.metadata = metadata;
        self
    }

    pub fn processing(mut self, reason: FailureReason, metadata: Value) -> Self {
        self.status = PaymentStatus::Processing;
        self.failure_reason = Some(reason);
        self.metadata = metadata;
        self
    }

    /// A `processing` row with no reason marks an activation in flight
    pub fn claimed(mut self, metadata: Value) -> Self {
        self.status = PaymentStatus::Processing;
        self.failure_reason = None;
        self.metadata = metadata;
        self
    }

    pub fn succeeded(mut self, metadata: Value) -> Self {
        self.status = PaymentStatus::Success;
        self.failure_reason = None;
        self.metadata = metadata;
        self
    }
}

/// Shallow-merge `incoming` into `existing`; incoming keys win
pub fn merge_metadata(existing: &mut Value, incoming: &Value) {
    match (existing.as_object_mut(), incoming.as_object()) {
        (Some(target), Some(source)) => {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        (None, Some(_)) => *existing = incoming.clone(),
        _ => {}
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Ledger helpers shared by the verifier, recovery operator and canceller
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn BillingStore>,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// A `success` row for this payment, if the money was already applied
    pub async fn find_success(
        &self,
        org_id: Uuid,
        external_payment_id: &str,
    ) -> BillingResult<Option<PaymentRecord>> {
        Ok(self
            .store
            .find_payment(org_id, external_payment_id)
            .await?
            .filter(|record| record.status == PaymentStatus::Success))
    }

    pub async fn get(&self, org_id: Uuid, record_id: Uuid) -> BillingResult<Option<PaymentRecord>> {
        self.store.get_payment(org_id, record_id).await
    }

    pub async fn upsert(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord> {
        let record = self.store.upsert_payment(entry).await?;
        tracing::debug!(
            org_id = %record.org_id,
            record_id = %record.id,
            status = %record.status,
            external_payment_id = ?record.external_payment_id,
            "Ledger row written"
        );
        Ok(record)
    }

    /// Take the right to apply this payment. `None` means another caller
    /// holds it or the payment already succeeded.
    pub async fn claim(&self, entry: &LedgerEntry) -> BillingResult<Option<PaymentRecord>> {
        let claimed = self.store.claim_payment(entry).await?;
        if claimed.is_none() {
            tracing::info!(
                org_id = %entry.org_id,
                external_payment_id = ?entry.external_payment_id,
                "Payment claim lost"
            );
        }
        Ok(claimed)
    }

    pub async fn append(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord> {
        self.store.append_payment(entry).await
    }

    /// Write the failure row for an attempt that is about to return an error.
    ///
    /// A failed write is logged but never replaces the caller's error.
    pub async fn record_failure(&self, entry: &LedgerEntry) {
        if let Err(e) = self.store.upsert_payment(entry).await {
            tracing::error!(
                org_id = %entry.org_id,
                external_payment_id = ?entry.external_payment_id,
                status = %entry.status,
                failure_reason = ?entry.failure_reason,
                error = %e,
                "CRITICAL: Failed to record payment failure in ledger"
            );
        }
    }

    pub async fn list(&self, org_id: Uuid) -> BillingResult<Vec<PaymentRecord>> {
        self.store.list_payments(org_id).await
    }
}
