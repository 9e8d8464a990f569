use crate::{
    entities::{
        product::{self, Entity as Product},
        product_variant::{self, Entity as ProductVariant},
    },
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// A variant joined with its parent product; the product carries the
/// authoritative price and display name.
#[derive(Debug, Clone)]
pub struct PricedVariant {
    pub variant: product_variant::Model,
    pub product: product::Model,
}

impl PricedVariant {
    pub fn unit_price(&self) -> Decimal {
        self.product.price
    }
}

#[derive(Debug, Serialize)]
pub struct ProductWithVariants {
    #[serde(flatten)]
    pub product: product::Model,
    pub variants: Vec<product_variant::Model>,
}

#[derive(Debug, Serialize)]
pub struct ProductPage {
    pub products: Vec<product::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Narrow read-side queries over the catalog. Catalog writes happen in the
/// admin tooling, not here.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a variant together with its parent product. Used by the
    /// preference builder to re-price cart lines from catalog data.
    #[instrument(skip(self))]
    pub async fn priced_variant(&self, variant_id: i32) -> Result<PricedVariant, ServiceError> {
        let (variant, product) = ProductVariant::find_by_id(variant_id)
            .find_also_related(Product)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("variant {variant_id} not found")))?;

        let product = product.ok_or_else(|| {
            ServiceError::InternalError(format!("variant {variant_id} has no parent product"))
        })?;

        Ok(PricedVariant { variant, product })
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        category_id: Option<i32>,
        page: u64,
        per_page: u64,
    ) -> Result<ProductPage, ServiceError> {
        let mut query = Product::find().order_by_asc(product::Column::Id);
        if let Some(category_id) = category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(ProductPage {
            products,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: i32) -> Result<ProductWithVariants, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id} not found")))?;

        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .order_by_asc(product_variant::Column::Id)
            .all(&*self.db)
            .await?;

        Ok(ProductWithVariants { product, variants })
    }
}
