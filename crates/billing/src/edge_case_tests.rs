// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Cross-service scenarios:
//! - Verification idempotency and concurrent duplicates
//! - Signature and capture failures leave subscriptions alone
//! - Recovery of reconciliation failures, including legacy rows
//! - Owner-only mutations
//! - Cancellation from every paid plan
//! - Missing credentials short-circuit everything

#[cfg(test)]
mod verification_tests {
    use crate::testing::{sign, TestHarness};
    use crate::{BillingError, FailureReason, PaymentStatus};
    use tasklane_shared::SubscriptionStatus;

    // =========================================================================
    // Upgrade from free to professional, then replay the same callback
    // =========================================================================
    #[tokio::test]
    async fn test_order_then_verify_then_replay() {
        let h = TestHarness::new().await;
        h.gateway.set_next_order_id("order_abc").await;

        let order = h
            .billing
            .orders
            .create_order(h.org_id, "professional", h.owner_id)
            .await
            .unwrap();
        assert_eq!(order.external_order_id, "order_abc");
        assert_eq!(order.amount, 49_900);
        assert_eq!(order.currency, "INR");

        h.gateway.set_payment("pay_xyz", "captured").await;
        let request = h.signed_request("order_abc", "pay_xyz", "professional");

        let first = h.billing.verifier.verify_and_activate(&request).await.unwrap();
        assert!(first.success);
        assert!(!first.already_processed);

        let org = h.store.organization(h.org_id).await.unwrap();
        assert_eq!(org.current_plan_id, "professional");
        assert_eq!(org.subscription_status, SubscriptionStatus::Active);

        let rows = h.store.payments().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Success);
        assert_eq!(rows[0].plan_id, "professional");
        assert_eq!(rows[0].amount_minor_units, 49_900);

        let org_writes = h.store.org_write_count();
        let second = h.billing.verifier.verify_and_activate(&request).await.unwrap();
        assert!(second.success);
        assert!(second.already_processed);
        assert_eq!(second.payment_record_id, first.payment_record_id);

        // No second fetch, no second write
        assert_eq!(h.gateway.fetch_payment_calls(), 1);
        assert_eq!(h.store.org_write_count(), org_writes);
        assert_eq!(h.store.payments().await.len(), 1);
        assert_eq!(h.store.organization(h.org_id).await.unwrap(), org);
    }

    // =========================================================================
    // Concurrent duplicate callbacks apply the payment exactly once
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_duplicate_verification() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_dup", "captured").await;
        let request = h.signed_request("order_dup", "pay_dup", "starter");

        let (a, b) = tokio::join!(
            h.billing.verifier.verify_and_activate(&request),
            h.billing.verifier.verify_and_activate(&request)
        );

        let results = [a, b];
        let applied: Vec<_> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter(|r| !r.already_processed)
            .collect();
        assert_eq!(applied.len(), 1);
        for result in &results {
            match result {
                Ok(r) => assert_eq!(r.payment_record_id, applied[0].payment_record_id),
                Err(e) => assert!(matches!(e, BillingError::InvalidState(_)), "unexpected {:?}", e),
            }
        }
        assert_eq!(h.store.org_write_count(), 1);

        let rows = h.store.payments().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Success);
        assert_eq!(
            h.store.organization(h.org_id).await.unwrap().current_plan_id,
            "starter"
        );
    }

    // =========================================================================
    // Tampered signatures never touch the organization
    // =========================================================================
    #[tokio::test]
    async fn test_tampered_signatures_rejected() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_t", "captured").await;
        let valid = sign("order_t", "pay_t");

        let tampered = [
            String::new(),
            "0".repeat(64),
            valid.to_uppercase(),
            valid[1..].to_string(),
            format!("{}0", valid),
            sign("order_t", "pay_other"),
            sign("order_other", "pay_t"),
        ];

        for signature in tampered {
            let mut request = h.signed_request("order_t", "pay_t", "professional");
            request.signature = signature.clone();

            let err = h.billing.verifier.verify_and_activate(&request).await.unwrap_err();
            assert!(matches!(err, BillingError::SignatureMismatch), "signature {:?}", signature);

            let org = h.store.organization(h.org_id).await.unwrap();
            assert_eq!(org.subscription_status, SubscriptionStatus::None);
            assert_eq!(org.current_plan_id, "free");
        }

        let rows = h.store.payments().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Failed);
        assert_eq!(rows[0].failure_reason, Some(FailureReason::SignatureInvalid));
        assert_eq!(rows[0].metadata["verification_failed"], true);
        assert_eq!(h.gateway.fetch_payment_calls(), 0);
    }

    // =========================================================================
    // Every non-captured gateway status leaves the plan unchanged
    // =========================================================================
    #[tokio::test]
    async fn test_non_captured_statuses_never_activate() {
        for status in ["created", "authorized", "refunded", "failed", "Captured", ""] {
            let h = TestHarness::new().await;
            h.gateway.set_payment("pay_nc", status).await;

            let err = h
                .billing
                .verifier
                .verify_and_activate(&h.signed_request("order_nc", "pay_nc", "enterprise"))
                .await
                .unwrap_err();
            assert!(
                matches!(err, BillingError::PaymentNotCaptured(ref s) if s == status),
                "status {:?}",
                status
            );

            let org = h.store.organization(h.org_id).await.unwrap();
            assert_eq!(org.current_plan_id, "free");
            let rows = h.store.payments().await;
            assert_eq!(rows[0].failure_reason, Some(FailureReason::NotCaptured));
            assert_eq!(rows[0].metadata["gateway_status"], status);
        }
    }

    // =========================================================================
    // A callback arriving while another holds the payment changes nothing
    // =========================================================================
    #[tokio::test]
    async fn test_verify_during_inflight_activation_is_refused() {
        let h = TestHarness::new().await;
        h.seed_record(PaymentStatus::Processing, None, serde_json::json!({}))
            .await;
        h.gateway.set_payment("pay_seed", "captured").await;

        let err = h
            .billing
            .verifier
            .verify_and_activate(&h.signed_request("order_seed", "pay_seed", "professional"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidState(_)));
        assert_eq!(h.store.org_write_count(), 0);
        assert_eq!(h.store.payments().await[0].status, PaymentStatus::Processing);
    }

    // =========================================================================
    // Activation succeeded but the success row could not be written
    // =========================================================================
    #[tokio::test]
    async fn test_success_write_failure_is_reconciliation() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_w", "captured").await;
        h.store.set_fail_success_writes(true);

        let err = h
            .billing
            .verifier
            .verify_and_activate(&h.signed_request("order_w", "pay_w", "professional"))
            .await
            .unwrap_err();
        assert!(err.is_reconciliation_pending());

        // The organization moved, the claimed row is left for recovery
        let org = h.store.organization(h.org_id).await.unwrap();
        assert!(org.is_active_on("professional"));
        let row = h.store.payments().await[0].clone();
        assert_eq!(row.status, PaymentStatus::Processing);
        assert!(row.failure_reason.is_none());

        h.store.set_fail_success_writes(false);
        let outcome = h
            .billing
            .recovery
            .retry_payment(h.org_id, row.id, h.owner_id)
            .await
            .unwrap();
        assert!(matches!(outcome, crate::RetryOutcome::Recovered { .. }));
        assert_eq!(h.store.payments().await[0].status, PaymentStatus::Success);
        let org = h.store.organization(h.org_id).await.unwrap();
        assert_eq!(org.subscription_ref.as_deref(), Some("order_w"));
    }

    // =========================================================================
    // A success row survives a later failing attempt with the same key
    // =========================================================================
    #[tokio::test]
    async fn test_success_row_not_downgraded() {
        let h = TestHarness::new().await;
        h.activate("starter", "order_s", "pay_s").await;

        let row = h.store.payments().await[0].clone();
        let attempt = crate::LedgerEntry::from_record(&row).failed(
            FailureReason::SignatureInvalid,
            serde_json::json!({"verification_failed": true}),
        );
        let ledger = crate::PaymentLedger::new(h.store.clone());
        ledger.record_failure(&attempt).await;

        let after = &h.store.payments().await[0];
        assert_eq!(after.status, PaymentStatus::Success);
        assert!(after.failure_reason.is_none());
    }
}

#[cfg(test)]
mod recovery_tests {
    use crate::testing::TestHarness;
    use crate::{BillingError, FailureReason, PaymentStatus, RetryOutcome};
    use serde_json::json;
    use tasklane_shared::SubscriptionStatus;

    // =========================================================================
    // Captured payment, failed org write, then an owner retry
    // =========================================================================
    #[tokio::test]
    async fn test_reconciliation_failure_then_retry() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_r", "captured").await;
        h.store.set_fail_org_writes(true);

        let err = h
            .billing
            .verifier
            .verify_and_activate(&h.signed_request("order_r", "pay_r", "professional"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Reconciliation(_)));

        h.store.set_fail_org_writes(false);
        let record_id = h.store.payments().await[0].id;

        let outcome = h
            .billing
            .recovery
            .retry_payment(h.org_id, record_id, h.owner_id)
            .await
            .unwrap();
        assert!(!outcome.requires_new_payment());
        assert_eq!(h.store.org_write_count(), 1);

        let org = h.store.organization(h.org_id).await.unwrap();
        assert_eq!(org.current_plan_id, "professional");
        assert_eq!(org.subscription_status, SubscriptionStatus::Active);
        assert_eq!(org.billing_customer_ref.as_deref(), Some("pay_r"));
        assert_eq!(org.subscription_ref.as_deref(), Some("order_r"));

        let row = &h.store.payments().await[0];
        assert_eq!(row.status, PaymentStatus::Success);
        assert_eq!(row.metadata["retry_successful"], true);
        assert_eq!(row.metadata["org_update_failed"], true);

        // The verified callback is now a no-op
        let replay = h
            .billing
            .verifier
            .verify_and_activate(&h.signed_request("order_r", "pay_r", "professional"))
            .await
            .unwrap();
        assert!(replay.already_processed);
    }

    // =========================================================================
    // Later failing callbacks for a captured-but-unapplied payment keep it
    // recoverable
    // =========================================================================
    #[tokio::test]
    async fn test_reconciliation_row_survives_failing_callbacks() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_r", "captured").await;
        h.store.set_fail_org_writes(true);
        let request = h.signed_request("order_r", "pay_r", "professional");

        let err = h.billing.verifier.verify_and_activate(&request).await.unwrap_err();
        assert!(matches!(err, BillingError::Reconciliation(_)));
        h.store.set_fail_org_writes(false);

        // Tampered replay of the same callback
        let mut tampered = request.clone();
        tampered.signature = "0".repeat(64);
        assert!(matches!(
            h.billing.verifier.verify_and_activate(&tampered).await,
            Err(BillingError::SignatureMismatch)
        ));

        // Gateway down on a genuine replay
        h.gateway.fail_fetch_payment(true);
        assert!(matches!(
            h.billing.verifier.verify_and_activate(&request).await,
            Err(BillingError::GatewayVerification(_))
        ));
        h.gateway.fail_fetch_payment(false);

        let row = h.store.payments().await[0].clone();
        assert_eq!(row.status, PaymentStatus::Processing);
        assert_eq!(row.failure_reason, Some(FailureReason::OrgWriteFailed));
        assert_eq!(h.store.org_write_count(), 0);

        let outcome = h
            .billing
            .recovery
            .retry_payment(h.org_id, row.id, h.owner_id)
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::Recovered { .. }));
        let org = h.store.organization(h.org_id).await.unwrap();
        assert_eq!(org.current_plan_id, "professional");
        assert_eq!(org.subscription_status, SubscriptionStatus::Active);
    }

    // =========================================================================
    // A genuine replay after the org store recovers applies the payment
    // =========================================================================
    #[tokio::test]
    async fn test_reconciliation_row_applied_by_verified_replay() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_r", "captured").await;
        h.store.set_fail_org_writes(true);
        let request = h.signed_request("order_r", "pay_r", "professional");

        assert!(h.billing.verifier.verify_and_activate(&request).await.is_err());
        h.store.set_fail_org_writes(false);

        let result = h.billing.verifier.verify_and_activate(&request).await.unwrap();
        assert!(!result.already_processed);
        assert_eq!(h.store.org_write_count(), 1);

        let rows = h.store.payments().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Success);
        assert!(rows[0].failure_reason.is_none());
    }

    // =========================================================================
    // An old stuck payment never replaces a newer active subscription
    // =========================================================================
    #[tokio::test]
    async fn test_stale_row_does_not_override_newer_subscription() {
        let h = TestHarness::new().await;
        h.activate("enterprise", "order_new", "pay_new").await;
        let record_id = h
            .seed_record(PaymentStatus::Processing, Some(FailureReason::OrgWriteFailed), json!({}))
            .await;
        let before = h.store.organization(h.org_id).await.unwrap();
        let writes = h.store.org_write_count();

        let err = h
            .billing
            .recovery
            .retry_payment(h.org_id, record_id, h.owner_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidState(_)));

        assert_eq!(h.store.organization(h.org_id).await.unwrap(), before);
        assert_eq!(h.store.org_write_count(), writes);
        let row = h
            .store
            .payments()
            .await
            .into_iter()
            .find(|p| p.id == record_id)
            .unwrap();
        assert_eq!(row.status, PaymentStatus::Processing);
    }

    // =========================================================================
    // Rows written before the failure_reason column are classified by metadata
    // =========================================================================
    #[tokio::test]
    async fn test_legacy_org_update_failed_row_recovered() {
        let h = TestHarness::new().await;
        let record_id = h
            .seed_record(PaymentStatus::Failed, None, json!({"org_update_failed": true}))
            .await;

        let outcome = h
            .billing
            .recovery
            .retry_payment(h.org_id, record_id, h.owner_id)
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::Recovered { .. }));
        assert_eq!(h.store.org_write_count(), 1);
        assert_eq!(h.store.payments().await[0].status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn test_legacy_verification_failed_requires_new_payment() {
        for marker in ["verification_failed", "razorpay_verification_failed"] {
            let h = TestHarness::new().await;
            let record_id = h
                .seed_record(PaymentStatus::Failed, None, json!({ marker: true }))
                .await;
            let before = h.store.organization(h.org_id).await.unwrap();

            let outcome = h
                .billing
                .recovery
                .retry_payment(h.org_id, record_id, h.owner_id)
                .await
                .unwrap();
            assert_eq!(
                outcome,
                RetryOutcome::RequiresNewPayment {
                    plan_id: "professional".to_string(),
                    failure_reason: Some(FailureReason::SignatureInvalid),
                }
            );
            assert_eq!(h.store.organization(h.org_id).await.unwrap(), before);
            assert_eq!(h.store.org_write_count(), 0);
            assert_eq!(h.store.payments().await[0].status, PaymentStatus::Failed);
        }
    }

    // =========================================================================
    // Processing row with no reason at all is still a reconciliation case
    // =========================================================================
    #[tokio::test]
    async fn test_bare_processing_row_replayed() {
        let h = TestHarness::new().await;
        let record_id = h.seed_record(PaymentStatus::Processing, None, json!({})).await;

        let outcome = h
            .billing
            .recovery
            .retry_payment(h.org_id, record_id, h.owner_id)
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::Recovered { .. }));
    }

    #[tokio::test]
    async fn test_bare_failed_row_requires_new_payment() {
        let h = TestHarness::new().await;
        let record_id = h.seed_record(PaymentStatus::Failed, None, json!({})).await;

        let outcome = h
            .billing
            .recovery
            .retry_payment(h.org_id, record_id, h.owner_id)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::RequiresNewPayment {
                plan_id: "professional".to_string(),
                failure_reason: None,
            }
        );
    }

    // =========================================================================
    // Double-clicked retry: both calls reapply identical state
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_duplicate_retry_converges() {
        let h = TestHarness::new().await;
        let record_id = h
            .seed_record(PaymentStatus::Processing, Some(FailureReason::OrgWriteFailed), json!({}))
            .await;

        let (a, b) = tokio::join!(
            h.billing.recovery.retry_payment(h.org_id, record_id, h.owner_id),
            h.billing.recovery.retry_payment(h.org_id, record_id, h.owner_id)
        );

        let results = [a, b];
        assert!(results.iter().any(|r| r.is_ok()));
        for result in &results {
            match result {
                Ok(outcome) => assert!(matches!(outcome, RetryOutcome::Recovered { .. })),
                Err(e) => assert!(matches!(e, BillingError::InvalidState(_)), "unexpected {:?}", e),
            }
        }

        let rows = h.store.payments().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Success);

        let org = h.store.organization(h.org_id).await.unwrap();
        assert_eq!(org.current_plan_id, "professional");
        assert_eq!(org.subscription_status, SubscriptionStatus::Active);
        assert_eq!(org.billing_customer_ref.as_deref(), Some("pay_seed"));
        assert!((1..=2).contains(&h.store.org_write_count()));
    }
}

#[cfg(test)]
mod authorization_tests {
    use crate::testing::TestHarness;
    use crate::{BillingError, FailureReason, PaymentStatus};
    use serde_json::json;
    use uuid::Uuid;

    fn assert_unauthorized<T: std::fmt::Debug>(result: Result<T, BillingError>) {
        assert!(
            matches!(result, Err(BillingError::Unauthorized(_))),
            "expected Unauthorized, got {:?}",
            result
        );
    }

    fn non_owners(h: &TestHarness) -> Vec<Uuid> {
        vec![h.admin_id, h.member_id, Uuid::new_v4()]
    }

    #[tokio::test]
    async fn test_create_order_owner_only() {
        let h = TestHarness::new().await;
        for user in non_owners(&h) {
            assert_unauthorized(h.billing.orders.create_order(h.org_id, "starter", user).await);
        }
        assert_eq!(h.gateway.create_order_calls(), 0);
    }

    #[tokio::test]
    async fn test_verify_owner_only() {
        let h = TestHarness::new().await;
        h.gateway.set_payment("pay_a", "captured").await;
        for user in non_owners(&h) {
            let mut request = h.signed_request("order_a", "pay_a", "starter");
            request.acting_user_id = user;
            assert_unauthorized(h.billing.verifier.verify_and_activate(&request).await);
        }
        assert!(h.store.payments().await.is_empty());
        assert_eq!(h.store.organization(h.org_id).await.unwrap().current_plan_id, "free");
    }

    #[tokio::test]
    async fn test_retry_owner_only() {
        let h = TestHarness::new().await;
        let record_id = h
            .seed_record(PaymentStatus::Processing, Some(FailureReason::OrgWriteFailed), json!({}))
            .await;
        for user in non_owners(&h) {
            assert_unauthorized(h.billing.recovery.retry_payment(h.org_id, record_id, user).await);
        }
        assert_eq!(h.store.org_write_count(), 0);
        assert_eq!(h.store.payments().await[0].status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn test_cancel_owner_only() {
        let h = TestHarness::new().await;
        h.activate("starter", "order_c", "pay_c").await;
        for user in non_owners(&h) {
            assert_unauthorized(h.billing.cancellation.cancel(h.org_id, user).await);
        }
        assert_eq!(
            h.store.organization(h.org_id).await.unwrap().current_plan_id,
            "starter"
        );
        assert_eq!(h.store.payments().await.len(), 1);
    }
}

#[cfg(test)]
mod cancellation_tests {
    use crate::testing::TestHarness;
    use crate::PaymentStatus;

    // =========================================================================
    // Cancelling from any paid plan lands on free with a ledger row
    // =========================================================================
    #[tokio::test]
    async fn test_cancel_from_every_paid_plan() {
        for plan in ["starter", "professional", "enterprise"] {
            let h = TestHarness::new().await;
            h.activate(plan, "order_x", "pay_x").await;

            h.billing.cancellation.cancel(h.org_id, h.owner_id).await.unwrap();

            let org = h.store.organization(h.org_id).await.unwrap();
            assert_eq!(org.current_plan_id, "free");

            let cancelled: Vec<_> = h
                .store
                .payments()
                .await
                .into_iter()
                .filter(|p| p.status == PaymentStatus::Cancelled)
                .collect();
            assert_eq!(cancelled.len(), 1);
            assert_eq!(cancelled[0].metadata["previous_plan"], plan);
        }
    }

    // =========================================================================
    // Upgrading again after cancelling is allowed
    // =========================================================================
    #[tokio::test]
    async fn test_reorder_after_cancel() {
        let h = TestHarness::new().await;
        h.activate("professional", "order_1", "pay_1").await;
        h.billing.cancellation.cancel(h.org_id, h.owner_id).await.unwrap();

        assert!(h
            .billing
            .orders
            .create_order(h.org_id, "professional", h.owner_id)
            .await
            .is_ok());
    }
}

#[cfg(test)]
mod configuration_tests {
    use crate::testing::{TestHarness, TEST_KEY_SECRET};
    use crate::{BillingError, RazorpayConfig};

    // =========================================================================
    // Missing credentials fail before authorization or any I/O
    // =========================================================================
    #[tokio::test]
    async fn test_missing_credentials_short_circuit() {
        let h = TestHarness::with_config(RazorpayConfig::new("", TEST_KEY_SECRET)).await;

        // Even a non-member gets NotConfigured rather than Unauthorized
        let err = h
            .billing
            .orders
            .create_order(h.org_id, "starter", uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotConfigured(_)));

        h.gateway.set_payment("pay_1", "captured").await;
        let err = h
            .billing
            .verifier
            .verify_and_activate(&h.signed_request("order_1", "pay_1", "starter"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotConfigured(_)));

        assert_eq!(h.gateway.create_order_calls(), 0);
        assert_eq!(h.gateway.fetch_payment_calls(), 0);
        assert!(h.store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_also_unconfigured() {
        let h = TestHarness::with_config(RazorpayConfig::new("rzp_key", "  ")).await;
        let err = h
            .billing
            .orders
            .create_order(h.org_id, "starter", h.owner_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "billing_not_configured");
    }
}
