#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use storefront_api::{
    db,
    entities::{category, product, product_variant},
    errors::ServiceError,
    payments::{PaymentGateway, PaymentInfo, PreferenceRequest, PreferenceResponse},
};

/// Fresh in-memory SQLite database with the full schema applied. The pool
/// is pinned to one connection so every session sees the same database.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let pool = db::establish_connection("sqlite::memory:")
        .await
        .expect("failed to open test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");
    Arc::new(pool)
}

pub async fn seed_category(db: &DatabaseConnection, name: &str) -> category::Model {
    category::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed category")
}

pub async fn seed_product(
    db: &DatabaseConnection,
    category_id: i32,
    name: &str,
    sku: &str,
    price: Decimal,
) -> product::Model {
    product::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        sku: Set(sku.to_string()),
        image_urls: Set(None),
        category_id: Set(category_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed product")
}

pub async fn seed_variant(
    db: &DatabaseConnection,
    product_id: i32,
    size: &str,
    color: &str,
    stock: i32,
) -> product_variant::Model {
    product_variant::ActiveModel {
        product_id: Set(product_id),
        size: Set(size.to_string()),
        color: Set(color.to_string()),
        stock_quantity: Set(stock),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed variant")
}

/// Builds a gateway payment-details payload the way the payment API
/// reports it. Items are (variant_id, quantity, unit_price).
pub fn payment_info(
    payment_id: &str,
    status: &str,
    external_reference: Option<&str>,
    transaction_amount: &str,
    items: &[(i32, i64, &str)],
) -> PaymentInfo {
    let items: Vec<_> = items
        .iter()
        .map(|(id, qty, price)| {
            json!({ "id": id.to_string(), "quantity": qty, "unit_price": price })
        })
        .collect();

    serde_json::from_value(json!({
        "id": payment_id,
        "status": status,
        "external_reference": external_reference,
        "transaction_amount": transaction_amount.parse::<f64>().expect("amount"),
        "additional_info": { "items": items },
        "payer": { "email": "buyer@example.com" }
    }))
    .expect("payment info payload")
}

/// In-memory gateway double. Records every preference request and serves
/// configured payment lookups.
pub struct FakeGateway {
    pub preference_calls: AtomicUsize,
    pub captured_preferences: Mutex<Vec<PreferenceRequest>>,
    pub payments: Mutex<Vec<PaymentInfo>>,
    pub fail_fetch: bool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            preference_calls: AtomicUsize::new(0),
            captured_preferences: Mutex::new(Vec::new()),
            payments: Mutex::new(Vec::new()),
            fail_fetch: false,
        }
    }

    pub fn failing_fetch() -> Self {
        Self {
            fail_fetch: true,
            ..Self::new()
        }
    }

    pub fn with_payment(self, payment: PaymentInfo) -> Self {
        self.payments.lock().unwrap().push(payment);
        self
    }

    pub fn preference_call_count(&self) -> usize {
        self.preference_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_preference(
        &self,
        preference: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ServiceError> {
        self.preference_calls.fetch_add(1, Ordering::SeqCst);
        self.captured_preferences
            .lock()
            .unwrap()
            .push(preference.clone());
        Ok(PreferenceResponse {
            id: "pref-test-1".to_string(),
            init_point: "https://gateway.test/init/pref-test-1".to_string(),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentInfo, ServiceError> {
        if self.fail_fetch {
            return Err(ServiceError::GatewayError(
                "fetch payment: request timed out".to_string(),
            ));
        }
        self.payments
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == payment_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::GatewayError(format!("fetch payment returned 404: {payment_id}"))
            })
    }
}
