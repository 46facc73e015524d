//! Depot server binary.

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::config::AppConfig;
use depot_server::scheduler::spawn_background_jobs;
use depot_server::{AppState, create_router};
use depot_storage::FilesystemBackend;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - a caching proxy for source archives of remote packages
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional file merged with `DEPOT_` variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("DEPOT_") && key != "DEPOT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: depotd --config /path/to/config.toml\n  \
             2. Environment variables: DEPOT_SERVER__BIND=0.0.0.0:8080 \
             DEPOT_ADMIN__TOKEN_HASH=YOUR_TOKEN_HASH_HERE depotd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set DEPOT_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    tracing::info!(run_mode = ?config.server.run_mode, "Configuration loaded");

    depot_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let hot = Arc::new(
        FilesystemBackend::new(&config.archive.path)
            .await
            .context("failed to initialize hot tier")?,
    );
    tracing::info!(path = %config.archive.path.display(), "Hot tier initialized");

    let cold = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize cold tier")?;
    // Fail before accepting requests if the cold tier is unreachable.
    cold.health_check()
        .await
        .context("cold tier health check failed")?;
    tracing::info!(backend = cold.backend_name(), "Cold tier connectivity verified");

    let metadata = depot_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let (registry, fetcher) =
        depot_provider::from_config(&config.providers).context("failed to build providers")?;
    tracing::info!(providers = ?registry, "Providers registered");

    let state = AppState::new(config.clone(), hot, cold, metadata, registry, fetcher);
    let _jobs = spawn_background_jobs(&state);

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo feeds client IP extraction for download accounting.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
