//! Read-only billing views for any organization member

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::require_member;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{PaymentLedger, PaymentRecord};
use crate::plans::{free_plan, lookup_plan, Plan};
use crate::store::{BillingStore, OrganizationBilling};

/// Organization billing state with its resolved plan
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    pub organization: OrganizationBilling,
    pub plan: Plan,
}

pub struct HistoryService {
    store: Arc<dyn BillingStore>,
    ledger: PaymentLedger,
}

impl HistoryService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        let ledger = PaymentLedger::new(store.clone());
        Self { store, ledger }
    }

    /// Ledger rows for the organization, most recent first
    pub async fn get_payment_history(
        &self,
        org_id: Uuid,
        acting_user_id: Uuid,
    ) -> BillingResult<Vec<PaymentRecord>> {
        require_member(self.store.as_ref(), org_id, acting_user_id).await?;
        self.ledger.list(org_id).await
    }

    pub async fn get_subscription(
        &self,
        org_id: Uuid,
        acting_user_id: Uuid,
    ) -> BillingResult<SubscriptionOverview> {
        require_member(self.store.as_ref(), org_id, acting_user_id).await?;

        let organization = self
            .store
            .get_organization(org_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Organization {} not found", org_id)))?;

        // Plans retired from the catalog read as free
        let plan = match lookup_plan(&organization.current_plan_id) {
            Some(plan) => plan.clone(),
            None => {
                tracing::warn!(
                    org_id = %org_id,
                    plan_id = %organization.current_plan_id,
                    "Organization is on an unknown plan"
                );
                free_plan().clone()
            }
        };

        Ok(SubscriptionOverview { organization, plan })
    }
}
