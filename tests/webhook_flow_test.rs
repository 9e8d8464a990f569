//! HTTP-level webhook ingestion: signature gate, malformed payload
//! handling, and end-to-end settlement through the router.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{payment_info, seed_category, seed_product, seed_variant, test_db, FakeGateway};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt;

use storefront_api::{
    config::AppConfig,
    entities::{order::Entity as Order, product_variant::Entity as ProductVariant},
    payments::signature::signed_manifest,
    services::{
        catalog::CatalogService, checkout::CheckoutService, notifications::NoopNotifier,
        settlement::SettlementEngine,
    },
    AppState,
};

fn test_config(secret: Option<&str>) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 18000,
        environment: "test".to_string(),
        log_level: "info".to_string(),
        log_json: false,
        auto_migrate: true,
        mercadopago_access_token: "TEST-token".to_string(),
        mercadopago_webhook_secret: secret.map(str::to_string),
        gateway_base_url: "https://gateway.test".to_string(),
        gateway_timeout_secs: 5,
        frontend_url: "https://shop.example".to_string(),
        backend_url: "https://api.shop.example".to_string(),
        email_api_key: None,
        email_from: None,
        cors_allowed_origins: None,
    }
}

fn build_app(
    db: Arc<DatabaseConnection>,
    gateway: Arc<FakeGateway>,
    secret: Option<&str>,
) -> Router {
    let catalog = CatalogService::new(db.clone());
    let checkout = CheckoutService::new(
        catalog.clone(),
        gateway.clone(),
        "https://shop.example",
        "https://api.shop.example",
    );
    let settlement = SettlementEngine::new(db.clone(), Arc::new(NoopNotifier));

    storefront_api::app(AppState {
        db,
        config: test_config(secret),
        gateway,
        catalog,
        checkout,
        settlement,
    })
}

fn sign(secret: &str, data_id: &str, request_id: &str, ts: &str) -> String {
    let manifest = signed_manifest(data_id, request_id, ts);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(manifest.as_bytes());
    format!("ts={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn webhook_body(payment_id: &str) -> Body {
    Body::from(
        json!({ "type": "payment", "data": { "id": payment_id } }).to_string(),
    )
}

async fn status_body(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn signed_webhook_settles_the_order_end_to_end() {
    let db = test_db().await;
    let cat = seed_category(&db, "remeras").await;
    let prod_a = seed_product(&db, cat.id, "Remera Oversize", "SKU-A", dec!(500.25)).await;
    let prod_b = seed_product(&db, cat.id, "Buzo Hoodie", "SKU-B", dec!(500.00)).await;
    let var_a = seed_variant(&db, prod_a.id, "M", "negro", 5).await;
    let var_b = seed_variant(&db, prod_b.id, "L", "crudo", 1).await;

    let secret = "whsec-test";
    let gateway = Arc::new(FakeGateway::new().with_payment(payment_info(
        "pay-1",
        "approved",
        Some("guest-123"),
        "1500.50",
        &[(var_a.id, 2, "500.25"), (var_b.id, 1, "500.00")],
    )));
    let app = build_app(db.clone(), gateway, Some(secret));

    let signature = sign(secret, "pay-1", "req-1", "1700000000");
    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook?data.id=pay-1")
        .header("content-type", "application/json")
        .header("x-request-id", "req-1")
        .header("x-signature", signature)
        .body(webhook_body("pay-1"))
        .unwrap();

    let (status, body) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    assert_eq!(Order::find().count(&*db).await.unwrap(), 1);
    let var_a_after = ProductVariant::find_by_id(var_a.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    let var_b_after = ProductVariant::find_by_id(var_b.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(var_a_after.stock_quantity, 3);
    assert_eq!(var_b_after.stock_quantity, 0);
}

#[tokio::test]
async fn tampered_signature_is_rejected_before_settlement() {
    let db = test_db().await;
    let gateway = Arc::new(FakeGateway::new());
    let app = build_app(db.clone(), gateway, Some("whsec-test"));

    // Signed for a different payment id.
    let signature = sign("whsec-test", "pay-OTHER", "req-1", "1700000000");
    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook?data.id=pay-1")
        .header("content-type", "application/json")
        .header("x-request-id", "req-1")
        .header("x-signature", signature)
        .body(webhook_body("pay-1"))
        .unwrap();

    let (status, _) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(Order::find().count(&*db).await.unwrap(), 0);
}

#[tokio::test]
async fn missing_signature_header_is_rejected_when_secret_is_configured() {
    let db = test_db().await;
    let app = build_app(db, Arc::new(FakeGateway::new()), Some("whsec-test"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook?data.id=pay-1")
        .header("content-type", "application/json")
        .body(webhook_body("pay-1"))
        .unwrap();

    let (status, _) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_body_is_acknowledged_as_a_benign_ping() {
    let db = test_db().await;
    let app = build_app(db.clone(), Arc::new(FakeGateway::new()), None);

    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook")
        .body(Body::empty())
        .unwrap();

    let (status, body) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(Order::find().count(&*db).await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let db = test_db().await;
    let app = build_app(db, Arc::new(FakeGateway::new()), None);

    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_payment_events_are_ignored() {
    let db = test_db().await;
    let app = build_app(db.clone(), Arc::new(FakeGateway::new()), None);

    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "type": "plan", "data": { "id": "x" } }).to_string(),
        ))
        .unwrap();

    let (status, body) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn gateway_fetch_failure_is_acknowledged_and_logged() {
    let db = test_db().await;
    let app = build_app(db.clone(), Arc::new(FakeGateway::failing_fetch()), None);

    let request = Request::builder()
        .method("POST")
        .uri("/api/checkout/webhook")
        .header("content-type", "application/json")
        .body(webhook_body("pay-1"))
        .unwrap();

    // 200 with an error status body: gateway retries are not amplified,
    // the failure is left to reconciliation.
    let (status, body) = status_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(Order::find().count(&*db).await.unwrap(), 0);
}

#[tokio::test]
async fn redelivered_webhook_does_not_settle_twice() {
    let db = test_db().await;
    let cat = seed_category(&db, "remeras").await;
    let prod = seed_product(&db, cat.id, "Remera", "SKU-1", dec!(100)).await;
    let var = seed_variant(&db, prod.id, "S", "negro", 5).await;

    let gateway = Arc::new(FakeGateway::new().with_payment(payment_info(
        "pay-9",
        "approved",
        Some("user-2"),
        "100",
        &[(var.id, 1, "100")],
    )));
    let app = build_app(db.clone(), gateway, None);

    for _ in 0..2 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/checkout/webhook")
            .header("content-type", "application/json")
            .body(webhook_body("pay-9"))
            .unwrap();
        let (status, body) = status_body(app.clone().oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    assert_eq!(Order::find().count(&*db).await.unwrap(), 1);
    let var_after = ProductVariant::find_by_id(var.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(var_after.stock_quantity, 4);
}
