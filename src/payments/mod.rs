pub mod signature;

use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::instrument;

/// Payment status code the gateway reports for settled payments.
pub const STATUS_APPROVED: &str = "approved";

/// Boundary to the payment gateway. The settlement engine and the
/// preference builder only ever talk to this trait, so tests can run
/// against fakes and credentials stay injectable.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a checkout preference from an already re-priced cart and
    /// returns the gateway's preference id plus redirect target.
    async fn create_preference(
        &self,
        preference: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ServiceError>;

    /// Fetches authoritative payment details by gateway payment id.
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentInfo, ServiceError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceItem {
    /// Variant id, stringified; echoed back in the payment's item list.
    pub id: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub back_urls: BackUrls,
    pub auto_return: String,
    pub notification_url: String,
    pub external_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceResponse {
    pub id: String,
    pub init_point: String,
}

/// One purchased item as reported by the gateway. The gateway serializes
/// numeric fields inconsistently (sometimes strings), so parsing is
/// tolerant of both forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PaidItem {
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "de_i64_lenient")]
    pub quantity: i64,
    #[serde(deserialize_with = "de_decimal_lenient")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AdditionalInfo {
    #[serde(default)]
    items: Vec<PaidItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Payer {
    #[serde(default)]
    email: Option<String>,
}

/// Authoritative payment details fetched from the gateway. Webhook
/// payloads are never trusted for amounts or items; this is.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInfo {
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    pub status: String,
    /// The buyer reference the preference was created with.
    pub external_reference: Option<String>,
    pub transaction_amount: Decimal,
    #[serde(default)]
    additional_info: Option<AdditionalInfo>,
    #[serde(default)]
    payer: Option<Payer>,
}

impl PaymentInfo {
    pub fn items(&self) -> &[PaidItem] {
        self.additional_info
            .as_ref()
            .map(|info| info.items.as_slice())
            .unwrap_or(&[])
    }

    pub fn payer_email(&self) -> Option<&str> {
        self.payer.as_ref().and_then(|p| p.email.as_deref())
    }

    pub fn is_approved(&self) -> bool {
        self.status == STATUS_APPROVED
    }
}

fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn de_i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("quantity is not an integer")),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom("quantity is not an integer")),
        other => Err(serde::de::Error::custom(format!(
            "expected integer, got {other}"
        ))),
    }
}

fn de_decimal_lenient<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .to_string()
            .parse::<Decimal>()
            .map_err(serde::de::Error::custom),
        serde_json::Value::String(s) => s.parse::<Decimal>().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected decimal, got {other}"
        ))),
    }
}

/// Mercado Pago REST client with a bounded request timeout.
pub struct MercadoPagoClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl MercadoPagoClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn map_request_error(context: &str, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::GatewayError(format!("{context}: request timed out"))
        } else {
            ServiceError::GatewayError(format!("{context}: {err}"))
        }
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    #[instrument(skip(self, preference), fields(external_reference = %preference.external_reference))]
    async fn create_preference(
        &self,
        preference: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ServiceError> {
        let url = format!("{}/checkout/preferences", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(preference)
            .send()
            .await
            .map_err(|e| Self::map_request_error("create preference", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayError(format!(
                "create preference returned {status}: {body}"
            )));
        }

        response
            .json::<PreferenceResponse>()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("create preference response: {e}")))
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentInfo, ServiceError> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Self::map_request_error("fetch payment", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayError(format!(
                "fetch payment returned {status}: {body}"
            )));
        }

        response
            .json::<PaymentInfo>()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("fetch payment response: {e}")))
    }
}
