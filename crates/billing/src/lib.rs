// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries gateway messages by value
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tasklane Billing Module
//!
//! Razorpay-backed plan upgrades for organizations.
//!
//! ## Features
//!
//! - **Orders**: Create gateway orders for paid plans
//! - **Verification**: Check checkout signatures, confirm capture, activate plans
//! - **Ledger**: One idempotent row per gateway payment, the audit trail
//! - **Recovery**: Replay captured payments whose activation did not land
//! - **Cancellation**: Return organizations to the free tier

mod access;
pub mod cancellation;
pub mod client;
pub mod error;
pub mod gateway;
pub mod history;
pub mod ledger;
pub mod orders;
pub mod plans;
pub mod recovery;
pub mod signature;
pub mod store;
pub mod verification;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(test)]
mod edge_case_tests;

// Cancellation
pub use cancellation::{CancellationResult, CancellationService};

// Client
pub use client::{RazorpayClient, RazorpayConfig};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{CreateOrderRequest, GatewayOrder, GatewayPayment, PaymentGateway};

// History
pub use history::{HistoryService, SubscriptionOverview};

// Ledger
pub use ledger::{FailureReason, LedgerEntry, PaymentLedger, PaymentRecord, PaymentStatus};

// Orders
pub use orders::{OrderResponse, OrderService};

// Plans
pub use plans::{all_plans, lookup_plan, BillingInterval, Plan, FREE_PLAN_ID};

// Recovery
pub use recovery::{RecoveryService, RetryOutcome};

// Store
pub use store::{
    BillingStore, InMemoryBillingStore, OrganizationBilling, PgBillingStore,
    SubscriptionActivation,
};

// Verification
pub use verification::{PaymentVerifier, VerificationResult, VerifyPaymentRequest};

use sqlx::PgPool;
use std::sync::Arc;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub orders: OrderService,
    pub verifier: PaymentVerifier,
    pub recovery: RecoveryService,
    pub cancellation: CancellationService,
    pub history: HistoryService,
    config: RazorpayConfig,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let client = RazorpayClient::from_env()?;
        let config = client.config().clone();

        Ok(Self::new(
            config,
            Arc::new(client),
            Arc::new(PgBillingStore::new(pool)),
        ))
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        config: RazorpayConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        Self {
            orders: OrderService::new(config.clone(), gateway.clone(), store.clone()),
            verifier: PaymentVerifier::new(config.clone(), gateway, store.clone()),
            recovery: RecoveryService::new(store.clone()),
            cancellation: CancellationService::new(store.clone()),
            history: HistoryService::new(store),
            config,
        }
    }

    /// Public key id handed to the browser checkout
    pub fn gateway_key_id(&self) -> &str {
        &self.config.key_id
    }
}
