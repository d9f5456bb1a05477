use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{instrument, warn};
use url::Url;

use super::{
    read_json, scalar_to_string, CallbackHint, GatewayError, InitiateRequest, InitiateResponse,
    NormalizedResult, PaymentGateway, PaymentHandle, VerifyRequest,
};
use crate::config::EsewaConfig;
use crate::entities::Provider;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_FIELD_NAMES: &str = "total_amount,transaction_uuid,product_code";

/// eSewa ePay v2 (locally signed form post). The provider reference is
/// `transaction_uuid`, which is the payment attempt id.
pub struct EsewaGateway {
    config: EsewaConfig,
    client: Client,
}

impl EsewaGateway {
    pub fn new(config: EsewaConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn mac(&self) -> Result<HmacSha256, GatewayError> {
        HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|_| GatewayError::Configuration("invalid eSewa secret key".into()))
    }

    /// Base64 HMAC-SHA256 over `name=value` pairs joined by commas.
    pub fn sign(&self, message: &str) -> Result<String, GatewayError> {
        let mut mac = self.mac()?;
        mac.update(message.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn failure_url(&self, transaction_uuid: &str) -> Result<String, GatewayError> {
        let mut url = Url::parse(&self.config.failure_url)
            .map_err(|e| GatewayError::Configuration(format!("eSewa failure_url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("transaction_uuid", transaction_uuid);
        Ok(url.into())
    }

    /// Decodes the `data` parameter eSewa appends to the success URL and checks
    /// its signature over the fields it claims to have signed.
    fn decode_signed_data(&self, data: &str) -> Result<Value, GatewayError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|_| GatewayError::InvalidCallback("data is not base64".into()))?;
        let payload: Value = serde_json::from_slice(&bytes)
            .map_err(|_| GatewayError::InvalidCallback("data is not JSON".into()))?;

        let field = |name: &str| payload.get(name).and_then(scalar_to_string);

        let signed_names = field("signed_field_names")
            .ok_or_else(|| GatewayError::InvalidCallback("missing signed_field_names".into()))?;
        let signature = field("signature")
            .ok_or_else(|| GatewayError::InvalidCallback("missing signature".into()))?;

        let names: Vec<&str> = signed_names.split(',').map(str::trim).collect();
        if !names.contains(&"transaction_uuid") {
            return Err(GatewayError::InvalidCallback(
                "transaction_uuid is not signed".into(),
            ));
        }

        let mut message = Vec::with_capacity(names.len());
        for name in &names {
            let value = field(name).ok_or_else(|| {
                GatewayError::InvalidCallback(format!("signed field {} missing", name))
            })?;
            message.push(format!("{}={}", name, value));
        }

        let provided = STANDARD
            .decode(signature.trim())
            .map_err(|_| GatewayError::InvalidCallback("signature is not base64".into()))?;
        let mut mac = self.mac()?;
        mac.update(message.join(",").as_bytes());
        mac.verify_slice(&provided).map_err(|_| {
            warn!("eSewa callback signature mismatch");
            GatewayError::InvalidCallback("signature mismatch".into())
        })?;

        Ok(payload)
    }
}

/// Minor units to the rupee string eSewa expects, e.g. 10050 -> "100.5".
pub fn format_amount(minor: i64) -> String {
    Decimal::new(minor, 2).normalize().to_string()
}

fn parse_amount(value: &str) -> Option<i64> {
    let amount = Decimal::from_str(value.trim()).ok()?;
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Maps an eSewa status API value to `(success, terminal)`.
pub fn classify_status(status: &str) -> (bool, bool) {
    match status {
        "COMPLETE" => (true, true),
        "CANCELED" | "FULL_REFUND" | "PARTIAL_REFUND" => (false, true),
        // PENDING, AMBIGUOUS, NOT_FOUND and anything unrecognised: ask again later.
        _ => (false, false),
    }
}

#[async_trait]
impl PaymentGateway for EsewaGateway {
    fn provider(&self) -> Provider {
        Provider::Esewa
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, GatewayError> {
        let transaction_uuid = request.payment_id.to_string();
        let total_amount = format_amount(request.amount);
        let signature = self.sign(&format!(
            "total_amount={},transaction_uuid={},product_code={}",
            total_amount, transaction_uuid, self.config.product_code
        ))?;

        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), total_amount.clone());
        fields.insert("tax_amount".to_string(), "0".to_string());
        fields.insert("product_service_charge".to_string(), "0".to_string());
        fields.insert("product_delivery_charge".to_string(), "0".to_string());
        fields.insert("total_amount".to_string(), total_amount);
        fields.insert("transaction_uuid".to_string(), transaction_uuid.clone());
        fields.insert("product_code".to_string(), self.config.product_code.clone());
        fields.insert("success_url".to_string(), self.config.success_url.clone());
        fields.insert(
            "failure_url".to_string(),
            self.failure_url(&transaction_uuid)?,
        );
        fields.insert(
            "signed_field_names".to_string(),
            SIGNED_FIELD_NAMES.to_string(),
        );
        fields.insert("signature".to_string(), signature);

        let raw = serde_json::to_value(&fields).map_err(|e| GatewayError::Protocol(e.to_string()))?;

        Ok(InitiateResponse {
            handle: PaymentHandle::Form {
                action: self.config.form_url.clone(),
                fields,
            },
            reference: transaction_uuid,
            raw,
        })
    }

    #[instrument(skip(self, request), fields(transaction_uuid = %request.reference))]
    async fn verify(&self, request: &VerifyRequest) -> Result<NormalizedResult, GatewayError> {
        let total_amount = format_amount(request.amount);
        let response = self
            .client
            .get(&self.config.status_url)
            .query(&[
                ("product_code", self.config.product_code.as_str()),
                ("total_amount", total_amount.as_str()),
                ("transaction_uuid", request.reference.as_str()),
            ])
            .send()
            .await?;
        let raw = read_json(response).await?;

        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Protocol("status response has no status".into()))?
            .to_string();
        let provider_reference = raw
            .get("transaction_uuid")
            .and_then(scalar_to_string)
            .unwrap_or_else(|| request.reference.clone());
        let amount = raw
            .get("total_amount")
            .and_then(scalar_to_string)
            .and_then(|v| parse_amount(&v));
        let (success, terminal) = classify_status(&status);

        Ok(NormalizedResult {
            success,
            terminal,
            raw_state: status,
            provider_reference,
            amount,
            raw,
        })
    }

    fn parse_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackHint, GatewayError> {
        if let Some(data) = params.get("data") {
            let payload = self.decode_signed_data(data)?;
            let reference = payload
                .get("transaction_uuid")
                .and_then(scalar_to_string)
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| GatewayError::InvalidCallback("missing transaction_uuid".into()))?;
            return Ok(CallbackHint {
                reference,
                state_hint: payload.get("status").and_then(scalar_to_string),
                raw: payload,
            });
        }

        // Failure redirects carry only the reference we put on the failure URL.
        let reference = params
            .get("transaction_uuid")
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| GatewayError::InvalidCallback("missing data".into()))?;

        Ok(CallbackHint {
            reference: reference.to_string(),
            state_hint: None,
            raw: serde_json::json!({ "transaction_uuid": reference }),
        })
    }
}
