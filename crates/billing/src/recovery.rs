//! Owner-triggered retry of failed or stuck payments

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::require_owner;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{now_rfc3339, FailureReason, LedgerEntry, PaymentLedger, PaymentStatus};
use crate::plans::lookup_plan;
use crate::store::{BillingStore, SubscriptionActivation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// The captured payment was applied to the organization
    Recovered {
        payment_record_id: Uuid,
        plan_id: String,
    },
    /// Nothing was charged that could be applied; the customer must pay again
    RequiresNewPayment {
        plan_id: String,
        failure_reason: Option<FailureReason>,
    },
}

impl RetryOutcome {
    pub fn requires_new_payment(&self) -> bool {
        matches!(self, RetryOutcome::RequiresNewPayment { .. })
    }
}

/// Recovery service
pub struct RecoveryService {
    store: Arc<dyn BillingStore>,
    ledger: PaymentLedger,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        let ledger = PaymentLedger::new(store.clone());
        Self { store, ledger }
    }

    /// Retry a `failed` or `processing` ledger row.
    ///
    /// Only rows whose payment was captured but never applied are replayed;
    /// everything else asks for a fresh checkout.
    pub async fn retry_payment(
        &self,
        org_id: Uuid,
        payment_record_id: Uuid,
        acting_user_id: Uuid,
    ) -> BillingResult<RetryOutcome> {
        require_owner(self.store.as_ref(), org_id, acting_user_id, "retry payments").await?;

        let record = self
            .ledger
            .get(org_id, payment_record_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment {} not found", payment_record_id)))?;

        if !record.status.is_retryable() {
            return Err(BillingError::InvalidState(format!(
                "Payment {} is {}; only failed or processing payments can be retried",
                record.id, record.status
            )));
        }

        let reason = record.effective_failure_reason();
        let replay = match reason {
            Some(reason) if reason.requires_new_payment() => false,
            Some(FailureReason::OrgWriteFailed) => true,
            _ => record.status == PaymentStatus::Processing,
        };

        if !replay {
            tracing::info!(
                org_id = %org_id,
                record_id = %record.id,
                failure_reason = ?reason,
                "Retry needs a new payment"
            );
            return Ok(RetryOutcome::RequiresNewPayment {
                plan_id: record.plan_id,
                failure_reason: reason,
            });
        }

        let (Some(payment_id), Some(order_id)) = (
            record.external_payment_id.as_deref(),
            record.external_order_id.as_deref(),
        ) else {
            return Err(BillingError::InvalidState(format!(
                "Payment {} has no gateway references to replay",
                record.id
            )));
        };

        let plan = lookup_plan(&record.plan_id)
            .filter(|plan| plan.is_paid())
            .ok_or_else(|| BillingError::InvalidPlan(record.plan_id.clone()))?;

        let org = self
            .store
            .get_organization(org_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Organization {} not found", org_id)))?;
        if org.has_other_active_subscription(order_id) {
            tracing::warn!(
                org_id = %org_id,
                record_id = %record.id,
                current_plan_id = %org.current_plan_id,
                current_subscription_ref = ?org.subscription_ref,
                "Stale payment replay refused, organization has a newer subscription"
            );
            return Err(BillingError::InvalidState(format!(
                "Payment {} predates the organization's current subscription and needs manual reconciliation",
                record.id
            )));
        }

        let activation = SubscriptionActivation::from_payment(plan.id, order_id, payment_id);
        if let Err(e) = self.store.activate_subscription(org_id, &activation).await {
            tracing::error!(
                org_id = %org_id,
                record_id = %record.id,
                error = %e,
                "CRITICAL: Retry could not update organization"
            );
            return Err(e);
        }

        let entry = LedgerEntry::from_record(&record).succeeded(json!({
            "retried_at": now_rfc3339(),
            "retry_successful": true,
            "retried_by": acting_user_id,
        }));
        let updated = self.ledger.upsert(&entry).await?;

        tracing::info!(
            org_id = %org_id,
            record_id = %updated.id,
            plan_id = %plan.id,
            "Payment recovered, subscription activated"
        );

        Ok(RetryOutcome::Recovered {
            payment_record_id: updated.id,
            plan_id: plan.id.to_string(),
        })
    }
}
