//! x402 Stellar Facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that exposes the x402 protocol interface
//! for payment verification and settlement on Stellar networks.
//!
//! Endpoints:
//! - `GET /verify` – Supported verification schema
//! - `POST /verify` – Verify a payment payload against requirements
//! - `GET /settle` – Supported settlement schema
//! - `POST /settle` – Settle an accepted payment payload on the ledger
//! - `GET /supported` – List supported payment kinds (version/scheme/network)
//! - `GET /health`, `GET /version`
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `STELLAR_NETWORKS`, `RPC_URL_STELLAR*` select the served networks
//! - `RUST_LOG` controls log verbosity

use axum::http::Method;
use axum::Router;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tower_http::cors;

use x402_stellar_facilitator::facilitator_local::FacilitatorLocal;
use x402_stellar_facilitator::from_env::FacilitatorConfig;
use x402_stellar_facilitator::handlers;
use x402_stellar_facilitator::provider_cache::ProviderCache;
use x402_stellar_facilitator::sig_down::SigDown;
use x402_stellar_facilitator::telemetry::Telemetry;

/// How often expired settlement results are dropped from memory.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Initializes the x402 facilitator server.
///
/// - Loads `.env` variables.
/// - Initializes logging.
/// - Connects ledger clients for the configured Stellar networks.
/// - Starts an Axum HTTP server with the x402 protocol handlers.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = match FacilitatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Abort if we can't initialise ledger clients early
    let provider_cache = match ProviderCache::from_config(&config) {
        Ok(provider_cache) => provider_cache,
        Err(e) => {
            tracing::error!("Failed to create ledger clients: {}", e);
            std::process::exit(1);
        }
    };

    let facilitator = FacilitatorLocal::new(provider_cache, config.settlement);
    let settlement_store = facilitator.settlement_store().clone();
    let axum_state = Arc::new(facilitator);

    let sig_down = SigDown::try_new()?;
    let background = TaskTracker::new();
    background.spawn(settlement_store.run_purge(PURGE_INTERVAL, sig_down.cancellation_token()));
    background.close();

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = config.socket_addr();
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    background.wait().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
