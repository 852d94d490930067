//! Subscription cancellation

use serde::Serialize;
use std::sync::Arc;
use tasklane_shared::SubscriptionStatus;
use uuid::Uuid;

use crate::access::require_owner;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{LedgerEntry, PaymentLedger};
use crate::plans::{free_plan, lookup_plan, FREE_PLAN_ID};
use crate::store::BillingStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationResult {
    pub previous_plan_id: String,
    pub current_plan_id: String,
    pub subscription_status: SubscriptionStatus,
    pub payment_record_id: Uuid,
}

/// Cancellation service
pub struct CancellationService {
    store: Arc<dyn BillingStore>,
    ledger: PaymentLedger,
}

impl CancellationService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        let ledger = PaymentLedger::new(store.clone());
        Self { store, ledger }
    }

    /// Move the organization to the free tier and record it in the ledger.
    ///
    /// Every call writes a ledger row, including repeat cancellations.
    pub async fn cancel(&self, org_id: Uuid, acting_user_id: Uuid) -> BillingResult<CancellationResult> {
        require_owner(self.store.as_ref(), org_id, acting_user_id, "cancel subscriptions").await?;

        let org = self
            .store
            .get_organization(org_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Organization {} not found", org_id)))?;

        self.store.cancel_subscription(org_id).await?;

        let currency = lookup_plan(&org.current_plan_id)
            .unwrap_or_else(free_plan)
            .currency;
        let entry = LedgerEntry::cancellation(
            org_id,
            acting_user_id,
            &org.current_plan_id,
            org.subscription_ref.as_deref(),
            currency,
        );
        let record = self.ledger.append(&entry).await?;

        tracing::info!(
            org_id = %org_id,
            previous_plan = %org.current_plan_id,
            record_id = %record.id,
            "Subscription cancelled"
        );

        Ok(CancellationResult {
            previous_plan_id: org.current_plan_id,
            current_plan_id: FREE_PLAN_ID.to_string(),
            subscription_status: SubscriptionStatus::Cancelled,
            payment_record_id: record.id,
        })
    }
}
