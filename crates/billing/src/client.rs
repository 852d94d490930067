//! Razorpay client and credentials

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CreateOrderRequest, GatewayOrder, GatewayPayment, PaymentGateway};

pub const DEFAULT_API_BASE: &str = "https://api.razorpay.com/v1";

/// Attempts after the first for idempotent gateway reads
const FETCH_RETRIES: usize = 2;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Razorpay credentials
#[derive(Clone)]
pub struct RazorpayConfig {
    /// Public key id, also handed to the browser checkout
    pub key_id: String,
    /// Server-held secret; signs checkout callbacks
    pub key_secret: String,
    pub api_base: String,
}

impl std::fmt::Debug for RazorpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &"[redacted]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl RazorpayConfig {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Load from `RAZORPAY_KEY_ID`, `RAZORPAY_KEY_SECRET` and optional `RAZORPAY_API_BASE`
    pub fn from_env() -> BillingResult<Self> {
        let key_id = std::env::var("RAZORPAY_KEY_ID").unwrap_or_default();
        let key_secret = std::env::var("RAZORPAY_KEY_SECRET").unwrap_or_default();
        let config = Self::new(key_id, key_secret);
        config.ensure_configured()?;

        Ok(match std::env::var("RAZORPAY_API_BASE") {
            Ok(base) if !base.trim().is_empty() => config.with_api_base(base),
            _ => config,
        })
    }

    /// Both halves of the key pair must be present
    pub fn ensure_configured(&self) -> BillingResult<()> {
        let mut missing = Vec::new();
        if self.key_id.trim().is_empty() {
            missing.push("RAZORPAY_KEY_ID");
        }
        if self.key_secret.trim().is_empty() {
            missing.push("RAZORPAY_KEY_SECRET");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BillingError::NotConfigured(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }
}

/// Error body returned by the Razorpay API
#[derive(Debug, Deserialize)]
struct RazorpayErrorBody {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Failure of a single HTTP exchange, before mapping to `BillingError`
#[derive(Debug)]
enum RequestFailure {
    Transport(String),
    Status { status: u16, message: String },
    Decode(String),
}

impl RequestFailure {
    fn is_transient(&self) -> bool {
        match self {
            RequestFailure::Transport(_) => true,
            RequestFailure::Status { status, .. } => *status == 429 || *status >= 500,
            RequestFailure::Decode(_) => false,
        }
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestFailure::Transport(e) => write!(f, "transport error: {}", e),
            RequestFailure::Status { status, message } => {
                write!(f, "HTTP {}: {}", status, message)
            }
            RequestFailure::Decode(e) => write!(f, "unexpected response: {}", e),
        }
    }
}

/// Razorpay REST client
#[derive(Clone)]
pub struct RazorpayClient {
    http: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build tuned HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self { http, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(RazorpayConfig::from_env()?))
    }

    pub fn config(&self) -> &RazorpayConfig {
        &self.config
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RequestFailure> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| RequestFailure::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<RazorpayErrorBody>(&body) {
            Ok(parsed) => format!(
                "{}: {}",
                parsed.error.code.unwrap_or_else(|| "ERROR".to_string()),
                parsed
                    .error
                    .description
                    .unwrap_or_else(|| "no description".to_string())
            ),
            Err(_) => body,
        };
        Err(RequestFailure::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_payment_once(&self, payment_id: &str) -> Result<GatewayPayment, RequestFailure> {
        let response = self
            .http
            .get(format!("{}/payments/{}", self.config.api_base, payment_id))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .send()
            .await
            .map_err(|e| RequestFailure::Transport(e.to_string()))?;
        Self::decode(response).await
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    /// Not retried: a timed-out create may still have produced an order
    async fn create_order(&self, request: &CreateOrderRequest) -> BillingResult<GatewayOrder> {
        let response = self
            .http
            .post(format!("{}/orders", self.config.api_base))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(request)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(RequestFailure::Transport(e.to_string()).to_string()))?;

        let order: GatewayOrder = Self::decode(response)
            .await
            .map_err(|e| BillingError::Gateway(e.to_string()))?;

        tracing::info!(
            order_id = %order.id,
            amount = order.amount,
            currency = %order.currency,
            receipt = %request.receipt,
            "Created Razorpay order"
        );
        Ok(order)
    }

    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<GatewayPayment> {
        let strategy = ExponentialBackoff::from_millis(10)
            .factor(10)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(FETCH_RETRIES);

        RetryIf::spawn(
            strategy,
            || self.get_payment_once(payment_id),
            |e: &RequestFailure| {
                let transient = e.is_transient();
                if transient {
                    tracing::warn!(payment_id = %payment_id, error = %e, "Retrying Razorpay payment fetch");
                }
                transient
            },
        )
        .await
        .map_err(|e| BillingError::Gateway(e.to_string()))
    }
}
