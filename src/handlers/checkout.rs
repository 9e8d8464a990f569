use crate::{
    errors::ServiceError,
    payments::signature::verify_webhook_signature,
    services::checkout::{CreatePreferenceRequest, CreatePreferenceResponse},
    AppState,
};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, info, warn};

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/create_preference", post(create_preference))
        .route("/webhook", post(webhook))
}

/// POST /api/checkout/create_preference
#[utoipa::path(
    post,
    path = "/api/checkout/create_preference",
    request_body = CreatePreferenceRequest,
    responses(
        (status = 200, description = "Preference created", body = CreatePreferenceResponse),
        (status = 400, description = "Empty cart, missing buyer reference or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown variant", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_preference(
    State(state): State<AppState>,
    Json(request): Json<CreatePreferenceRequest>,
) -> Result<Json<CreatePreferenceResponse>, ServiceError> {
    let response = state.checkout.create_preference(&request).await?;
    Ok(Json(response))
}

/// POST /api/checkout/webhook
///
/// Always acknowledges verified, well-formed deliveries with 200 so the
/// gateway does not amplify transient failures into retry storms; bodies
/// carry `ok`, `ignored` or `error` for operational visibility.
#[utoipa::path(
    post,
    path = "/api/checkout/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Bad signature or malformed payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.mercadopago_webhook_secret.as_deref() {
        let signature_header = headers
            .get("x-signature")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                ServiceError::InvalidSignature("missing x-signature header".to_string())
            })?;
        let data_id = params.get("data.id").map(String::as_str).unwrap_or("");
        let request_id = headers
            .get("x-request-id")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        verify_webhook_signature(secret, data_id, request_id, signature_header).map_err(|e| {
            warn!("webhook signature verification failed");
            e
        })?;
    } else {
        warn!("webhook signature verification skipped (no shared secret configured)");
    }

    // Gateways probe notification URLs with empty bodies; acknowledge
    // without action.
    if body.is_empty() {
        return Ok(Json(json!({ "status": "ignored" })));
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {e}")))?;

    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    if event_type != "payment" {
        info!(event_type, "ignoring non-payment webhook event");
        return Ok(Json(json!({ "status": "ignored" })));
    }

    let payment_id = match event.pointer("/data/id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            info!("payment event without payment id, ignoring");
            return Ok(Json(json!({ "status": "ignored", "reason": "no payment id" })));
        }
    };

    // Amounts and items are only ever taken from the gateway's payment
    // API, not from the webhook payload.
    let payment = match state.gateway.fetch_payment(&payment_id).await {
        Ok(payment) => payment,
        Err(e) => {
            error!(%payment_id, error = %e, "failed to fetch payment details, flagged for reconciliation");
            return Ok(Json(json!({ "status": "error" })));
        }
    };

    match state.settlement.settle(&payment).await {
        Ok(outcome) => {
            use crate::services::settlement::SettlementOutcome::*;
            let status = match outcome {
                Committed { .. } | AlreadySettled => "ok",
                NotApproved { .. } => "ignored",
            };
            Ok(Json(json!({ "status": status })))
        }
        Err(e) => {
            error!(%payment_id, error = %e, "settlement failed, flagged for reconciliation");
            Ok(Json(json!({ "status": "error" })))
        }
    }
}
