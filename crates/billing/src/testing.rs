//! Test doubles: a scripted gateway and a ready-made billing fixture

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tasklane_shared::MemberRole;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::RazorpayConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CreateOrderRequest, GatewayOrder, GatewayPayment, PaymentGateway};
use crate::ledger::{merge_metadata, FailureReason, PaymentRecord, PaymentStatus};
use crate::signature::expected_signature;
use crate::store::{InMemoryBillingStore, OrganizationBilling};
use crate::verification::VerifyPaymentRequest;
use crate::BillingService;

pub const TEST_KEY_ID: &str = "rzp_test_key";
pub const TEST_KEY_SECRET: &str = "rzp_test_secret";

pub fn test_config() -> RazorpayConfig {
    RazorpayConfig::new(TEST_KEY_ID, TEST_KEY_SECRET)
}

/// Gateway double with scripted payment states and call counters
#[derive(Default)]
pub struct MockGateway {
    next_order_id: Mutex<Option<String>>,
    /// payment id -> gateway status
    payments: Mutex<HashMap<String, String>>,
    orders: Mutex<Vec<CreateOrderRequest>>,
    fail_create: AtomicBool,
    fail_fetch: AtomicBool,
    order_seq: AtomicUsize,
    create_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id handed out by the next `create_order`
    pub async fn set_next_order_id(&self, order_id: &str) {
        *self.next_order_id.lock().await = Some(order_id.to_string());
    }

    pub async fn set_payment(&self, payment_id: &str, status: &str) {
        self.payments
            .lock()
            .await
            .insert(payment_id.to_string(), status.to_string());
    }

    pub fn fail_create_order(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetch_payment(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn create_order_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_payment_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub async fn last_order_request(&self) -> Option<CreateOrderRequest> {
        self.orders.lock().await.last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(&self, request: &CreateOrderRequest) -> BillingResult<GatewayOrder> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("scripted order failure".to_string()));
        }
        self.orders.lock().await.push(request.clone());

        let id = match self.next_order_id.lock().await.take() {
            Some(id) => id,
            None => format!("order_test_{}", self.order_seq.fetch_add(1, Ordering::SeqCst)),
        };
        Ok(GatewayOrder {
            id,
            amount: request.amount,
            currency: request.currency.clone(),
            status: Some("created".to_string()),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<GatewayPayment> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers interleave
        tokio::task::yield_now().await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("scripted fetch failure".to_string()));
        }

        let status = self
            .payments
            .lock()
            .await
            .get(payment_id)
            .cloned()
            .ok_or_else(|| BillingError::Gateway("The id provided does not exist".to_string()))?;

        Ok(GatewayPayment {
            id: payment_id.to_string(),
            status,
            amount: None,
            currency: Some("INR".to_string()),
            order_id: None,
            method: Some("upi".to_string()),
        })
    }
}

/// A free-tier organization with one owner, one admin and one member
pub struct TestHarness {
    pub store: Arc<InMemoryBillingStore>,
    pub gateway: Arc<MockGateway>,
    pub billing: BillingService,
    pub org_id: Uuid,
    pub owner_id: Uuid,
    pub admin_id: Uuid,
    pub member_id: Uuid,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: RazorpayConfig) -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let gateway = Arc::new(MockGateway::new());
        let org_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let member_id = Uuid::new_v4();

        store.insert_organization(OrganizationBilling::free(org_id)).await;
        store.add_member(org_id, owner_id, MemberRole::Owner).await;
        store.add_member(org_id, admin_id, MemberRole::Admin).await;
        store.add_member(org_id, member_id, MemberRole::Member).await;

        let billing = BillingService::new(config, gateway.clone(), store.clone());

        Self {
            store,
            gateway,
            billing,
            org_id,
            owner_id,
            admin_id,
            member_id,
        }
    }

    /// Owner's verification request carrying a valid signature
    pub fn signed_request(&self, order_id: &str, payment_id: &str, plan_id: &str) -> VerifyPaymentRequest {
        VerifyPaymentRequest {
            external_order_id: order_id.to_string(),
            external_payment_id: payment_id.to_string(),
            signature: sign(order_id, payment_id),
            org_id: self.org_id,
            plan_id: plan_id.to_string(),
            acting_user_id: self.owner_id,
        }
    }

    /// Put the organization on `plan_id` through a captured payment
    pub async fn activate(&self, plan_id: &str, order_id: &str, payment_id: &str) {
        self.gateway.set_payment(payment_id, "captured").await;
        if let Err(e) = self
            .billing
            .verifier
            .verify_and_activate(&self.signed_request(order_id, payment_id, plan_id))
            .await
        {
            panic!("activation failed: {}", e);
        }
    }

    /// Insert a professional-plan ledger row for `pay_seed` directly
    pub async fn seed_record(
        &self,
        status: PaymentStatus,
        failure_reason: Option<FailureReason>,
        metadata: Value,
    ) -> Uuid {
        let mut merged = json!({ "seeded": true });
        merge_metadata(&mut merged, &metadata);
        let now = OffsetDateTime::now_utc();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            user_id: self.owner_id,
            amount_minor_units: 49_900,
            currency: "INR".to_string(),
            external_payment_id: Some("pay_seed".to_string()),
            external_order_id: Some("order_seed".to_string()),
            status,
            plan_id: "professional".to_string(),
            failure_reason,
            metadata: merged,
            created_at: now,
            updated_at: now,
        };
        let id = record.id;
        self.store.seed_payment(record).await;
        id
    }
}

/// Signature the checkout would return with the test key secret
pub fn sign(order_id: &str, payment_id: &str) -> String {
    expected_signature(TEST_KEY_SECRET, order_id, payment_id).unwrap_or_default()
}
