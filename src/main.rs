use std::{sync::Arc, time::Duration};

use axum::http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use storefront_api as api;
use storefront_api::services::notifications::{EmailNotifier, NoopNotifier, Notifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    if cfg.mercadopago_webhook_secret.is_none() {
        warn!("webhook signature verification is DISABLED (no shared secret configured)");
    }

    let db = Arc::new(api::db::establish_connection_from_app_config(&cfg).await?);
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await?;
    }

    let gateway: Arc<dyn api::payments::PaymentGateway> = Arc::new(
        api::payments::MercadoPagoClient::new(
            cfg.gateway_base_url.clone(),
            cfg.mercadopago_access_token.clone(),
            Duration::from_secs(cfg.gateway_timeout_secs),
        )?,
    );

    let notifier: Arc<dyn Notifier> = match (&cfg.email_api_key, &cfg.email_from) {
        (Some(api_key), Some(from)) => Arc::new(EmailNotifier::new(
            EmailNotifier::DEFAULT_BASE_URL,
            api_key.clone(),
            from.clone(),
        )?),
        _ => {
            info!("email provider not configured; order confirmations disabled");
            Arc::new(NoopNotifier)
        }
    };

    let catalog = api::services::catalog::CatalogService::new(db.clone());
    let checkout = api::services::checkout::CheckoutService::new(
        catalog.clone(),
        gateway.clone(),
        cfg.frontend_url.clone(),
        cfg.backend_url.clone(),
    );
    let settlement =
        api::services::settlement::SettlementEngine::new(db.clone(), notifier);

    let state = api::AppState {
        db,
        config: cfg.clone(),
        gateway,
        catalog,
        checkout,
        settlement,
    };

    let cors_layer = match cfg.cors_allowed_origins.as_deref() {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => {
            warn!("no CORS origins configured; allowing any origin");
            CorsLayer::permissive()
        }
    };

    let app = api::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    let addr = cfg.server_addr();
    info!(%addr, environment = %cfg.environment, "starting storefront-api");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
