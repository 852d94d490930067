//! Payment verification and subscription activation
//!
//! Runs after the browser checkout returns. Every outcome past the
//! authorization checks leaves a ledger row keyed by the gateway payment id.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::require_owner;
use crate::client::RazorpayConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::PaymentGateway;
use crate::ledger::{now_rfc3339, FailureReason, LedgerEntry, PaymentLedger};
use crate::plans::lookup_plan;
use crate::signature::verify_payment_signature;
use crate::store::{BillingStore, SubscriptionActivation};

/// Checkout callback fields plus the caller's context
#[derive(Debug, Clone)]
pub struct VerifyPaymentRequest {
    pub external_order_id: String,
    pub external_payment_id: String,
    pub signature: String,
    pub org_id: Uuid,
    pub plan_id: String,
    pub acting_user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    /// True when this payment had already been applied by an earlier call
    pub already_processed: bool,
    pub payment_record_id: Uuid,
    pub plan_id: String,
}

/// Payment verification service
pub struct PaymentVerifier {
    config: RazorpayConfig,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn BillingStore>,
    ledger: PaymentLedger,
}

impl PaymentVerifier {
    pub fn new(
        config: RazorpayConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        let ledger = PaymentLedger::new(store.clone());
        Self {
            config,
            gateway,
            store,
            ledger,
        }
    }

    /// Verify a completed checkout and move the organization onto the plan
    pub async fn verify_and_activate(
        &self,
        request: &VerifyPaymentRequest,
    ) -> BillingResult<VerificationResult> {
        self.config.ensure_configured()?;

        let org_id = request.org_id;
        let payment_id = request.external_payment_id.as_str();
        let order_id = request.external_order_id.as_str();

        if let Some(existing) = self.ledger.find_success(org_id, payment_id).await? {
            tracing::info!(
                org_id = %org_id,
                external_payment_id = %payment_id,
                record_id = %existing.id,
                "Payment already processed, skipping"
            );
            return Ok(VerificationResult {
                success: true,
                already_processed: true,
                payment_record_id: existing.id,
                plan_id: existing.plan_id,
            });
        }

        require_owner(
            self.store.as_ref(),
            org_id,
            request.acting_user_id,
            "verify payments",
        )
        .await?;

        let plan = lookup_plan(&request.plan_id)
            .filter(|plan| plan.is_paid())
            .ok_or_else(|| {
                BillingError::InvalidPlan(format!("{} is not a purchasable plan", request.plan_id))
            })?;

        let attempt =
            LedgerEntry::payment_attempt(org_id, request.acting_user_id, plan, order_id, payment_id);

        if !verify_payment_signature(&self.config.key_secret, order_id, payment_id, &request.signature) {
            tracing::warn!(
                org_id = %org_id,
                external_payment_id = %payment_id,
                external_order_id = %order_id,
                "Payment signature mismatch"
            );
            self.ledger
                .record_failure(&attempt.failed(
                    FailureReason::SignatureInvalid,
                    json!({
                        "verification_failed": true,
                        "error": BillingError::SignatureMismatch.to_string(),
                    }),
                ))
                .await;
            return Err(BillingError::SignatureMismatch);
        }

        let payment = match self.gateway.fetch_payment(payment_id).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::error!(
                    org_id = %org_id,
                    external_payment_id = %payment_id,
                    error = %e,
                    "Failed to fetch payment from gateway"
                );
                self.ledger
                    .record_failure(&attempt.failed(
                        FailureReason::GatewayRejected,
                        json!({
                            "gateway_fetch_failed": true,
                            "error": e.to_string(),
                        }),
                    ))
                    .await;
                return Err(BillingError::GatewayVerification(e.to_string()));
            }
        };

        if !payment.is_captured() {
            tracing::warn!(
                org_id = %org_id,
                external_payment_id = %payment_id,
                gateway_status = %payment.status,
                "Payment not captured"
            );
            self.ledger
                .record_failure(&attempt.failed(
                    FailureReason::NotCaptured,
                    json!({ "gateway_status": payment.status }),
                ))
                .await;
            return Err(BillingError::PaymentNotCaptured(payment.status));
        }

        let claim = attempt.clone().claimed(json!({
            "claimed_at": now_rfc3339(),
            "gateway_status": payment.status,
        }));
        if self.ledger.claim(&claim).await?.is_none() {
            return self.claim_lost(org_id, payment_id).await;
        }

        let activation = SubscriptionActivation::from_payment(plan.id, order_id, payment_id);
        if let Err(e) = self.store.activate_subscription(org_id, &activation).await {
            tracing::error!(
                org_id = %org_id,
                external_payment_id = %payment_id,
                plan_id = %plan.id,
                error = %e,
                "CRITICAL: Payment captured but organization update failed"
            );
            self.ledger
                .record_failure(&attempt.processing(
                    FailureReason::OrgWriteFailed,
                    json!({
                        "org_update_failed": true,
                        "error": e.to_string(),
                    }),
                ))
                .await;
            return Err(BillingError::Reconciliation(e.to_string()));
        }

        let mut metadata = json!({
            "verified_at": now_rfc3339(),
            "gateway_status": payment.status,
        });
        if let Some(amount) = payment.amount {
            metadata["gateway_amount"] = json!(amount);
        }
        if let Some(method) = &payment.method {
            metadata["method"] = json!(method);
        }

        // The claimed row stays `processing` if this write fails, so recovery can replay it
        let record = match self.ledger.upsert(&attempt.succeeded(metadata)).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    org_id = %org_id,
                    external_payment_id = %payment_id,
                    plan_id = %plan.id,
                    error = %e,
                    "CRITICAL: Subscription activated but ledger success write failed"
                );
                return Err(BillingError::Reconciliation(e.to_string()));
            }
        };

        tracing::info!(
            org_id = %org_id,
            plan_id = %plan.id,
            external_payment_id = %payment_id,
            record_id = %record.id,
            "Subscription activated"
        );

        Ok(VerificationResult {
            success: true,
            already_processed: false,
            payment_record_id: record.id,
            plan_id: plan.id.to_string(),
        })
    }

    /// Another call holds the payment, or finished it after our idempotency check
    async fn claim_lost(
        &self,
        org_id: Uuid,
        payment_id: &str,
    ) -> BillingResult<VerificationResult> {
        if let Some(existing) = self.ledger.find_success(org_id, payment_id).await? {
            return Ok(VerificationResult {
                success: true,
                already_processed: true,
                payment_record_id: existing.id,
                plan_id: existing.plan_id,
            });
        }

        tracing::warn!(
            org_id = %org_id,
            external_payment_id = %payment_id,
            "Payment is already being applied by another request"
        );
        Err(BillingError::InvalidState(format!(
            "Payment {} is already being applied",
            payment_id
        )))
    }
}
