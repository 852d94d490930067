//! Order initiation
//!
//! Creates a gateway order the browser checkout pays against. Nothing is
//! written locally until the payment comes back for verification.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::require_owner;
use crate::client::RazorpayConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CreateOrderRequest, PaymentGateway};
use crate::plans::lookup_plan;
use crate::store::BillingStore;

/// What the checkout needs to open the payment dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderResponse {
    pub external_order_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    /// Public key id for the client-side checkout
    pub gateway_key_id: String,
    pub plan_id: String,
}

/// Order initiation service
pub struct OrderService {
    config: RazorpayConfig,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn BillingStore>,
}

impl OrderService {
    pub fn new(
        config: RazorpayConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
        }
    }

    /// Create a gateway order for upgrading `org_id` to `plan_id`
    pub async fn create_order(
        &self,
        org_id: Uuid,
        plan_id: &str,
        acting_user_id: Uuid,
    ) -> BillingResult<OrderResponse> {
        self.config.ensure_configured()?;
        require_owner(self.store.as_ref(), org_id, acting_user_id, "create orders").await?;

        let plan = lookup_plan(plan_id)
            .filter(|plan| plan.is_paid())
            .ok_or_else(|| BillingError::InvalidPlan(format!("{} is not a purchasable plan", plan_id)))?;

        let org = self
            .store
            .get_organization(org_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Organization {} not found", org_id)))?;

        if org.is_active_on(plan.id) {
            return Err(BillingError::AlreadySubscribed(plan.id.to_string()));
        }

        let mut notes = BTreeMap::new();
        notes.insert("org_id".to_string(), org_id.to_string());
        notes.insert("plan_id".to_string(), plan.id.to_string());
        notes.insert("user_id".to_string(), acting_user_id.to_string());

        let request = CreateOrderRequest {
            amount: plan.price_minor_units,
            currency: plan.currency.to_string(),
            receipt: receipt_for(org_id),
            notes,
        };

        let order = self.gateway.create_order(&request).await.map_err(|e| {
            tracing::error!(org_id = %org_id, plan_id = %plan.id, error = %e, "Gateway order creation failed");
            match e {
                BillingError::Gateway(_) => e,
                other => BillingError::Gateway(other.to_string()),
            }
        })?;

        tracing::info!(
            org_id = %org_id,
            plan_id = %plan.id,
            external_order_id = %order.id,
            amount = order.amount,
            "Created payment order"
        );

        Ok(OrderResponse {
            external_order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            gateway_key_id: self.config.key_id.clone(),
            plan_id: plan.id.to_string(),
        })
    }
}

/// Receipt reference; the gateway caps receipts at 40 characters
fn receipt_for(org_id: Uuid) -> String {
    let org = org_id.simple().to_string();
    format!("org_{}_{}", &org[..12], OffsetDateTime::now_utc().unix_timestamp())
}
