use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

/// Purchase confirmation payload handed to the notifier after settlement
/// commits. Best-effort only; losing it never affects the order.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_id: i32,
    pub recipient: Option<String>,
    pub total_amount: Decimal,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), ServiceError>;
}

/// Used when no email provider is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), ServiceError> {
        debug!(order_id = confirmation.order_id, "email provider not configured, skipping confirmation");
        Ok(())
    }
}

/// Sends confirmation emails through a transactional email HTTP API.
pub struct EmailNotifier {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl EmailNotifier {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.resend.com";

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip(self, confirmation), fields(order_id = confirmation.order_id))]
    async fn send_order_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), ServiceError> {
        let Some(recipient) = confirmation.recipient.as_deref() else {
            debug!("payment carried no payer email, skipping confirmation");
            return Ok(());
        };

        let body = json!({
            "from": self.from,
            "to": [recipient],
            "subject": "¡Gracias por tu compra!",
            "html": format!(
                "<p>Tu compra fue procesada exitosamente.</p>\
                 <p>Número de orden: <strong>{}</strong></p>\
                 <p>Total: <strong>${}</strong></p>",
                confirmation.order_id, confirmation.total_amount
            ),
        });

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::InternalError(format!("email send: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::InternalError(format!(
                "email provider returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
