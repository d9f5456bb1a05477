use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::{
    read_json, CallbackHint, GatewayError, InitiateRequest, InitiateResponse, NormalizedResult,
    PaymentGateway, PaymentHandle, VerifyRequest,
};
use crate::config::KhaltiConfig;
use crate::entities::Provider;

/// Khalti ePayment (server-initiated redirect). The provider reference is `pidx`.
pub struct KhaltiGateway {
    config: KhaltiConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct InitiatePayload<'a> {
    return_url: &'a str,
    website_url: &'a str,
    amount: i64,
    purchase_order_id: String,
    purchase_order_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct InitiateBody {
    pidx: String,
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    pidx: String,
    status: String,
    #[serde(default)]
    total_amount: Option<i64>,
}

impl KhaltiGateway {
    pub fn new(config: KhaltiConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Key {}", self.config.secret_key))
            .map_err(|_| GatewayError::Configuration("invalid Khalti secret key".into()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

/// Maps a Khalti lookup status to `(success, terminal)`.
pub fn classify_status(status: &str) -> (bool, bool) {
    match status {
        "Completed" => (true, true),
        "Refunded" | "Expired" | "User canceled" | "Partially refunded" => (false, true),
        // Pending, Initiated and anything unrecognised: ask again later.
        _ => (false, false),
    }
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    fn provider(&self) -> Provider {
        Provider::Khalti
    }

    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, GatewayError> {
        let payload = InitiatePayload {
            return_url: &self.config.return_url,
            website_url: &self.config.website_url,
            amount: request.amount,
            purchase_order_id: request.payment_id.to_string(),
            purchase_order_name: &request.order_number,
        };

        let response = self
            .client
            .post(self.endpoint("epayment/initiate/"))
            .headers(self.headers()?)
            .json(&payload)
            .send()
            .await?;
        let raw = read_json(response).await?;

        let body: InitiateBody = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Protocol(format!("initiate response: {}", e)))?;
        debug!(pidx = %body.pidx, "khalti session opened");

        Ok(InitiateResponse {
            handle: PaymentHandle::Redirect {
                url: body.payment_url,
            },
            reference: body.pidx,
            raw,
        })
    }

    #[instrument(skip(self, request), fields(pidx = %request.reference))]
    async fn verify(&self, request: &VerifyRequest) -> Result<NormalizedResult, GatewayError> {
        let response = self
            .client
            .post(self.endpoint("epayment/lookup/"))
            .headers(self.headers()?)
            .json(&json!({ "pidx": request.reference }))
            .send()
            .await?;
        let raw = read_json(response).await?;

        let body: LookupBody = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Protocol(format!("lookup response: {}", e)))?;
        let (success, terminal) = classify_status(&body.status);

        Ok(NormalizedResult {
            success,
            terminal,
            raw_state: body.status,
            provider_reference: body.pidx,
            amount: body.total_amount,
            raw,
        })
    }

    fn parse_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackHint, GatewayError> {
        let reference = params
            .get("pidx")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| GatewayError::InvalidCallback("missing pidx".into()))?;

        let raw: Value = params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into();

        Ok(CallbackHint {
            reference: reference.to_string(),
            state_hint: params.get("status").cloned(),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn gateway() -> KhaltiGateway {
        KhaltiGateway::new(
            KhaltiConfig {
                base_url: "https://khalti.test/api/v2/".into(),
                secret_key: "live_secret_key_test".into(),
                return_url: "https://shop.test/return".into(),
                website_url: "https://shop.test".into(),
            },
            Client::new(),
        )
    }

    #[rstest]
    #[case("Completed", true, true)]
    #[case("Pending", false, false)]
    #[case("Initiated", false, false)]
    #[case("Expired", false, true)]
    #[case("User canceled", false, true)]
    #[case("Refunded", false, true)]
    #[case("Partially refunded", false, true)]
    #[case("completed", false, false)]
    #[case("", false, false)]
    fn lookup_status_mapping(#[case] status: &str, #[case] success: bool, #[case] terminal: bool) {
        assert_eq!(classify_status(status), (success, terminal));
    }

    #[test]
    fn callback_requires_pidx() {
        let gw = gateway();
        let mut params = HashMap::new();
        params.insert("status".to_string(), "Completed".to_string());
        assert!(matches!(
            gw.parse_callback(&params),
            Err(GatewayError::InvalidCallback(_))
        ));

        params.insert("pidx".to_string(), "  ".to_string());
        assert!(gw.parse_callback(&params).is_err());

        params.insert("pidx".to_string(), "bZQLD9wRVWo4CdESSfuSsB".to_string());
        let hint = gw.parse_callback(&params).unwrap();
        assert_eq!(hint.reference, "bZQLD9wRVWo4CdESSfuSsB");
        assert_eq!(hint.state_hint.as_deref(), Some("Completed"));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            gateway().endpoint("epayment/lookup/"),
            "https://khalti.test/api/v2/epayment/lookup/"
        );
    }
}
