use crate::{
    errors::ServiceError,
    services::catalog::{ProductPage, ProductWithVariants},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

const MAX_PAGE_SIZE: u64 = 100;

pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListProductsParams {
    pub category_id: Option<i32>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// GET /api/products
#[utoipa::path(
    get,
    path = "/api/products",
    params(ListProductsParams),
    responses(
        (status = 200, description = "Paginated product list")
    ),
    tag = "Catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListProductsParams>,
) -> Result<Json<ProductPage>, ServiceError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, MAX_PAGE_SIZE);

    let page = state
        .catalog
        .list_products(params.category_id, page, per_page)
        .await?;
    Ok(Json(page))
}

/// GET /api/products/{id}
#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product with its variants"),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ProductWithVariants>, ServiceError> {
    let product = state.catalog.get_product(id).await?;
    Ok(Json(product))
}
