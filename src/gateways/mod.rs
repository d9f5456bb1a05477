//! Redirect payment gateway adapters.
//!
//! Adapters translate the uniform [`PaymentGateway`] contract into one provider's
//! wire protocol. They hold configuration and an HTTP client only; they never touch
//! the database.

pub mod esewa;
pub mod khalti;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::Provider;

pub use esewa::EsewaGateway;
pub use khalti::KhaltiGateway;

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Timeout, connection failure or 5xx. Never evidence of a failed payment.
    #[error("gateway unreachable: {0}")]
    Transport(String),

    /// Well-formed 4xx business rejection.
    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    Protocol(String),

    /// Callback parameters that cannot be trusted even as a lookup hint.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// What the adapter needs to open a payment session.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
}

/// How the shopper's browser reaches the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentHandle {
    Redirect {
        url: String,
    },
    Form {
        action: String,
        fields: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub struct InitiateResponse {
    pub handle: PaymentHandle,
    pub reference: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub reference: String,
    /// Amount recorded on the attempt, in minor units
    pub amount: i64,
}

/// The only gateway view business logic reads. `raw` is kept for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    /// Funds captured, in the provider's own unambiguous vocabulary
    pub success: bool,
    /// State will not change without new user action
    pub terminal: bool,
    pub raw_state: String,
    pub provider_reference: String,
    /// Settled amount in minor units when the provider reports one
    pub amount: Option<i64>,
    pub raw: Value,
}

/// Reference extracted from an untrusted browser redirect.
#[derive(Debug, Clone)]
pub struct CallbackHint {
    pub reference: String,
    /// Provider's status claim. Logged, never used for decisions.
    pub state_hint: Option<String>,
    pub raw: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, GatewayError>;

    async fn verify(&self, request: &VerifyRequest) -> Result<NormalizedResult, GatewayError>;

    fn parse_callback(&self, params: &HashMap<String, String>)
        -> Result<CallbackHint, GatewayError>;
}

/// Provider to adapter map, constructed once at startup and shared by the services.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider that has credentials in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        let client = http_client(config.gateway_timeout())?;
        let mut registry = Self::new();

        if config.khalti.is_configured() {
            registry.register(Arc::new(KhaltiGateway::new(
                config.khalti.clone(),
                client.clone(),
            )));
        }
        if config.esewa.is_configured() {
            registry.register(Arc::new(EsewaGateway::new(config.esewa.clone(), client)));
        }

        info!(providers = ?registry.providers(), "payment gateways registered");
        Ok(registry)
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways.get(&provider).cloned().ok_or_else(|| {
            GatewayError::Configuration(format!("provider {} is not configured", provider))
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.to_string());
        providers
    }
}

/// Shared reqwest client with a bounded per-call timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Reads a provider response body, classifying failures by status class.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response.bytes().await?;

    if status.is_server_error() {
        return Err(GatewayError::Transport(format!(
            "status {}: {}",
            status,
            truncate(&body)
        )));
    }
    if !status.is_success() {
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            message: truncate(&body),
        });
    }

    serde_json::from_slice(&body).map_err(|e| GatewayError::Protocol(e.to_string()))
}

fn truncate(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_ERROR_BODY).collect()
}

/// String form of a JSON scalar, for providers that mix numbers and strings.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopGateway(Provider);

    #[async_trait]
    impl PaymentGateway for NoopGateway {
        fn provider(&self) -> Provider {
            self.0
        }

        async fn initiate(&self, _: &InitiateRequest) -> Result<InitiateResponse, GatewayError> {
            Err(GatewayError::Configuration("noop".into()))
        }

        async fn verify(&self, _: &VerifyRequest) -> Result<NormalizedResult, GatewayError> {
            Err(GatewayError::Transport("noop".into()))
        }

        fn parse_callback(
            &self,
            _: &HashMap<String, String>,
        ) -> Result<CallbackHint, GatewayError> {
            Err(GatewayError::InvalidCallback("noop".into()))
        }
    }

    #[test]
    fn registry_routes_by_provider() {
        let registry = GatewayRegistry::new().with(Arc::new(NoopGateway(Provider::Esewa)));

        assert_eq!(registry.providers(), vec![Provider::Esewa]);
        assert_eq!(
            registry.get(Provider::Esewa).unwrap().provider(),
            Provider::Esewa
        );
        assert!(matches!(
            registry.get(Provider::Khalti),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn unconfigured_providers_are_skipped() {
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            "127.0.0.1".into(),
            0,
            "test".into(),
        );
        let registry = GatewayRegistry::from_config(&config).unwrap();
        assert!(registry.providers().is_empty());
    }

    #[test]
    fn handle_serializes_with_type_tag() {
        let handle = PaymentHandle::Redirect {
            url: "https://pay.example/abc".into(),
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["type"], "redirect");
        assert_eq!(json["url"], "https://pay.example/abc");
    }
}
