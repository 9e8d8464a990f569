//! Storefront API
//!
//! Backend for a small storefront: catalog reads, Mercado Pago checkout
//! preference creation, and webhook-driven order settlement with
//! at-most-once semantics per gateway payment id.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use payments::PaymentGateway;
use services::{
    catalog::CatalogService, checkout::CheckoutService, settlement::SettlementEngine,
};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub gateway: Arc<dyn PaymentGateway>,
    pub catalog: CatalogService,
    pub checkout: CheckoutService,
    pub settlement: SettlementEngine,
}

/// Builds the full application router for the given state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .route("/health", get(handlers::health::health))
        .nest("/api", handlers::api_routes())
        .merge(openapi::swagger_ui())
        .with_state(state)
}
