//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Gateway credentials are missing; nothing else was attempted
    #[error("Billing is not configured: {0}")]
    NotConfigured(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Organization is already subscribed to the {0} plan")]
    AlreadySubscribed(String),

    /// Order creation failed at the gateway; no local state was written
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Payment signature verification failed")]
    SignatureMismatch,

    #[error("Could not confirm payment with the gateway: {0}")]
    GatewayVerification(String),

    #[error("Payment has not been captured (gateway status: {0})")]
    PaymentNotCaptured(String),

    /// The payment was captured but the organization could not be updated.
    /// The ledger row is left in `processing` and can be retried.
    #[error("Payment captured but subscription update failed: {0}")]
    Reconciliation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Errors where the customer's money may have moved and the ledger needs attention
    pub fn is_reconciliation_pending(&self) -> bool {
        matches!(self, BillingError::Reconciliation(_))
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::NotConfigured(_) => "billing_not_configured",
            BillingError::Unauthorized(_) => "forbidden",
            BillingError::InvalidPlan(_) => "invalid_plan",
            BillingError::AlreadySubscribed(_) => "already_subscribed",
            BillingError::Gateway(_) => "gateway_error",
            BillingError::SignatureMismatch => "signature_mismatch",
            BillingError::GatewayVerification(_) => "gateway_verification_failed",
            BillingError::PaymentNotCaptured(_) => "payment_not_captured",
            BillingError::Reconciliation(_) => "reconciliation_pending",
            BillingError::InvalidState(_) => "invalid_state",
            BillingError::NotFound(_) => "not_found",
            BillingError::Database(_) => "database_error",
            BillingError::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(e: serde_json::Error) -> Self {
        BillingError::Internal(format!("JSON error: {}", e))
    }
}
