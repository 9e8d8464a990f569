pub mod checkout;
pub mod health;
pub mod products;

use crate::AppState;
use axum::Router;

/// Assembles all `/api` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/checkout", checkout::checkout_routes())
        .nest("/products", products::products_routes())
}
