//! Payment gateway seam
//!
//! The billing services only talk to the gateway through [`PaymentGateway`],
//! so tests can substitute a scripted implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BillingResult;

/// Gateway status meaning funds have settled
pub const CAPTURED_STATUS: &str = "captured";

/// Order creation request, serialized as the gateway expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateOrderRequest {
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    /// Free-form tags echoed back on the order and its payments
    pub notes: BTreeMap<String, String>,
}

/// Order as returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Payment as returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    /// `created`, `authorized`, `captured`, `refunded` or `failed`
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

impl GatewayPayment {
    pub fn is_captured(&self) -> bool {
        self.status == CAPTURED_STATUS
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order the client-side checkout will pay against
    async fn create_order(&self, request: &CreateOrderRequest) -> BillingResult<GatewayOrder>;

    /// Fetch the current state of a payment
    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<GatewayPayment>;
}
