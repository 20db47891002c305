//! `cardregd` — the card registration server binary.
//!
//! Usage:
//!   cardregd --endpoint <url> --data-dir <path> [--listen <addr>]
//!
//! Exposes the vault module under `/vault/` and a health probe at `/healthz`.

use std::path::PathBuf;

use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tracing::info;

use cardreg_core::{Module, ServiceConfig};
use cardreg_vault::engine::EngineConfig;
use cardreg_vault::envelope::{EnvelopeConfig, SoapVersion};
use cardreg_vault::VaultModule;

/// Card registration server.
#[derive(Parser, Debug)]
#[command(name = "cardregd", about = "Card registration server")]
struct Cli {
    /// Vault SOAP endpoint URL.
    #[arg(long = "endpoint", required = true)]
    endpoint: String,

    /// Directory containing uploaded source data.
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// Photo directory (defaults to {data-dir}/photos).
    #[arg(long = "photo-dir")]
    photo_dir: Option<PathBuf>,

    /// SOAP version: 1.1 or 1.2.
    #[arg(long = "soap", default_value = "1.1")]
    soap: String,

    /// SOAP service namespace.
    #[arg(long = "namespace", default_value = "http://tempuri.org/")]
    namespace: String,

    /// Bounded worker count for batch execution.
    #[arg(long = "workers", default_value_t = 6)]
    workers: usize,

    /// Per-request timeout in seconds for outbound Vault calls.
    #[arg(long = "timeout", default_value_t = 30)]
    timeout: u64,

    /// Listen address.
    #[arg(long = "listen", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig {
        data_dir: cli.data_dir.clone(),
        photo_dir: cli.photo_dir.clone(),
        endpoint: cli.endpoint.clone(),
        soap_version: cli.soap.clone(),
        namespace: cli.namespace.clone(),
        workers: cli.workers,
        request_timeout_secs: cli.timeout,
        listen: cli.listen.clone(),
    };

    if let Some(dir) = &config.data_dir {
        std::fs::create_dir_all(dir)?;
    }

    let version = SoapVersion::parse(&config.soap_version)
        .ok_or_else(|| anyhow::anyhow!("unsupported SOAP version: {}", config.soap_version))?;
    let engine_config = EngineConfig {
        endpoint: config.endpoint.clone(),
        soap: EnvelopeConfig {
            version,
            namespace: config.namespace.clone(),
        },
        workers: config.workers,
        request_timeout: config.request_timeout(),
        data_dir: config.data_dir.clone(),
        photo_dir: config.resolve_photo_dir(),
        ..Default::default()
    };

    let vault_module = VaultModule::new(engine_config)
        .map_err(|e| anyhow::anyhow!("vault module init: {e}"))?;
    info!("Vault module initialized, endpoint {}", config.endpoint);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .nest(&format!("/{}", vault_module.name()), vault_module.routes());

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("cardregd listening on {}", config.listen);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
