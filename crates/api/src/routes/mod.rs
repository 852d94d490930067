//! Router construction

pub mod billing;

use axum::{middleware, routing::get, routing::post, Json, Router};
use serde_json::{json, Value};

use crate::{auth::require_auth, state::AppState};

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/billing/plans", get(billing::list_plans))
        .route(
            "/orgs/{org_id}/billing/subscription",
            get(billing::get_subscription),
        )
        .route("/orgs/{org_id}/billing/orders", post(billing::create_order))
        .route("/orgs/{org_id}/billing/verify", post(billing::verify_payment))
        .route(
            "/orgs/{org_id}/billing/payments/{payment_id}/retry",
            post(billing::retry_payment),
        )
        .route("/orgs/{org_id}/billing/cancel", post(billing::cancel_subscription))
        .route("/orgs/{org_id}/billing/payments", get(billing::get_payment_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", protected)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
