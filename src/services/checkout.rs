use crate::{
    errors::ServiceError,
    payments::{BackUrls, PaymentGateway, PreferenceItem, PreferenceRequest},
    services::catalog::CatalogService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

const CURRENCY: &str = "ARS";

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartLineInput {
    pub variant_id: i32,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePreferenceRequest {
    /// Authenticated user id or guest session id.
    #[validate(length(min = 1, message = "buyer reference is required"))]
    pub buyer_ref: String,
    #[validate(length(min = 1, message = "cart must not be empty"))]
    pub items: Vec<CartLineInput>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatePreferenceResponse {
    pub preference_id: String,
    pub init_point: String,
}

/// Builds gateway checkout preferences from a cart. Prices and titles come
/// from the catalog, never from the client.
#[derive(Clone)]
pub struct CheckoutService {
    catalog: CatalogService,
    gateway: Arc<dyn PaymentGateway>,
    frontend_url: String,
    backend_url: String,
}

impl CheckoutService {
    pub fn new(
        catalog: CatalogService,
        gateway: Arc<dyn PaymentGateway>,
        frontend_url: impl Into<String>,
        backend_url: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            gateway,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Validates and re-prices the cart, then asks the gateway for a
    /// preference. No storage writes; every validation failure happens
    /// before the gateway is called.
    #[instrument(skip(self, request), fields(buyer_ref = %request.buyer_ref, lines = request.items.len()))]
    pub async fn create_preference(
        &self,
        request: &CreatePreferenceRequest,
    ) -> Result<CreatePreferenceResponse, ServiceError> {
        request.validate()?;
        if request.buyer_ref.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "buyer reference is required".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            line.validate()?;
            let requested = i32::try_from(line.quantity).map_err(|_| {
                ServiceError::ValidationError(format!(
                    "quantity {} is out of range",
                    line.quantity
                ))
            })?;
            let priced = self.catalog.priced_variant(line.variant_id).await?;
            let available = priced.variant.stock_quantity;
            if available < requested {
                return Err(ServiceError::InsufficientStock {
                    variant_id: line.variant_id,
                    available,
                    requested,
                });
            }

            items.push(PreferenceItem {
                id: priced.variant.id.to_string(),
                title: priced.product.name.clone(),
                quantity: line.quantity,
                unit_price: priced.unit_price(),
                currency_id: CURRENCY.to_string(),
            });
        }

        let preference = PreferenceRequest {
            items,
            back_urls: BackUrls {
                success: format!("{}/payment/success", self.frontend_url),
                failure: format!("{}/payment/failure", self.frontend_url),
                pending: format!("{}/payment/pending", self.frontend_url),
            },
            auto_return: "approved".to_string(),
            notification_url: format!("{}/api/checkout/webhook", self.backend_url),
            external_reference: request.buyer_ref.clone(),
        };

        let created = self.gateway.create_preference(&preference).await?;
        info!(preference_id = %created.id, "checkout preference created");

        Ok(CreatePreferenceResponse {
            preference_id: created.id,
            init_point: created.init_point,
        })
    }
}
