//! Billing routes for Razorpay checkout

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tasklane_billing::{
    all_plans, BillingService, CancellationResult, OrderResponse, PaymentRecord, Plan,
    RetryOutcome, SubscriptionOverview, VerificationResult, VerifyPaymentRequest,
};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to create a gateway order
#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub plan_id: String,
}

/// Checkout callback forwarded by the frontend.
///
/// Accepts the field names the Razorpay checkout hands back as well.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentBody {
    #[serde(alias = "razorpay_order_id")]
    pub external_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub external_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
    pub plan_id: String,
}

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: &'static [Plan],
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<PaymentRecord>,
}

fn billing_service(state: &AppState) -> Result<&Arc<BillingService>, ApiError> {
    state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)
}

/// List purchasable and free plans
pub async fn list_plans() -> Json<PlansResponse> {
    Json(PlansResponse { plans: all_plans() })
}

/// Current plan and subscription status (any member)
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<SubscriptionOverview>, ApiError> {
    let billing = billing_service(&state)?;
    let overview = billing
        .history
        .get_subscription(org_id, auth_user.user_id)
        .await?;
    Ok(Json(overview))
}

/// Create an order for a plan upgrade (owner only)
pub async fn create_order(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<Uuid>,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<OrderResponse>, ApiError> {
    let billing = billing_service(&state)?;
    let order = billing
        .orders
        .create_order(org_id, &body.plan_id, auth_user.user_id)
        .await?;
    Ok(Json(order))
}

/// Verify a completed checkout and activate the plan (owner only)
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<Uuid>,
    Json(body): Json<VerifyPaymentBody>,
) -> Result<Json<VerificationResult>, ApiError> {
    let billing = billing_service(&state)?;

    let request = VerifyPaymentRequest {
        external_order_id: body.external_order_id,
        external_payment_id: body.external_payment_id,
        signature: body.signature,
        org_id,
        plan_id: body.plan_id,
        acting_user_id: auth_user.user_id,
    };

    let result = billing.verifier.verify_and_activate(&request).await?;
    Ok(Json(result))
}

/// Retry a failed or processing payment (owner only)
pub async fn retry_payment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((org_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RetryOutcome>, ApiError> {
    let billing = billing_service(&state)?;
    let outcome = billing
        .recovery
        .retry_payment(org_id, payment_id, auth_user.user_id)
        .await?;
    Ok(Json(outcome))
}

/// Cancel the subscription and return to the free tier (owner only)
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<CancellationResult>, ApiError> {
    let billing = billing_service(&state)?;
    let result = billing
        .cancellation
        .cancel(org_id, auth_user.user_id)
        .await?;
    Ok(Json(result))
}

/// Ledger rows, most recent first (any member)
pub async fn get_payment_history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<PaymentHistoryResponse>, ApiError> {
    let billing = billing_service(&state)?;
    let payments = billing
        .history
        .get_payment_history(org_id, auth_user.user_id)
        .await?;
    Ok(Json(PaymentHistoryResponse { payments }))
}
