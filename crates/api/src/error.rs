//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tasklane_billing::BillingError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Billing is disabled or has no gateway credentials
    #[error("Billing is not configured")]
    ServiceUnavailable,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Billing(e) => match e {
                BillingError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::Unauthorized(_) => StatusCode::FORBIDDEN,
                BillingError::InvalidPlan(_) | BillingError::SignatureMismatch => {
                    StatusCode::BAD_REQUEST
                }
                BillingError::AlreadySubscribed(_) | BillingError::InvalidState(_) => {
                    StatusCode::CONFLICT
                }
                BillingError::PaymentNotCaptured(_) => StatusCode::PAYMENT_REQUIRED,
                BillingError::Gateway(_) | BillingError::GatewayVerification(_) => {
                    StatusCode::BAD_GATEWAY
                }
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::Reconciliation(_)
                | BillingError::Database(_)
                | BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ServiceUnavailable => "billing_not_configured",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal_error",
            ApiError::Billing(e) => e.code(),
        }
    }

    /// Message safe to show the caller
    fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_)
            | ApiError::Billing(BillingError::Database(_))
            | ApiError::Billing(BillingError::Internal(_)) => "Internal server error".to_string(),
            ApiError::Billing(BillingError::Reconciliation(_)) => {
                "Payment received but the subscription could not be activated yet. \
                 It can be retried from the payment history."
                    .to_string()
            }
            ApiError::Billing(BillingError::Gateway(_))
            | ApiError::Billing(BillingError::GatewayVerification(_)) => {
                "Payment gateway request failed".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}
