use anyhow::{Context, Result};
use photo_store::api::{serve_until, AppState};
use photo_store::config::Config;
use photo_store::metadata_store::MetadataStore;
use photo_store::photo_service::PhotoService;
use photo_store::s3_store::S3ObjectStore;
use photo_store::session_scheduler::HttpSessionNotifier;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Picto photo store"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let metadata_store = MetadataStore::new(&config.database)
        .await
        .context("Failed to initialize metadata store")?;

    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = S3ObjectStore::new(&config.s3)
        .await
        .context("Failed to initialize S3 object store")?;

    let notifier = HttpSessionNotifier::new(&config.session_scheduler, config.scheduler_timeout())
        .context("Failed to initialize session scheduler client")?;

    if !config.session_scheduler.enabled {
        warn!("Session scheduler notifications are disabled");
    }

    let service = PhotoService::new(
        Arc::new(metadata_store),
        Arc::new(object_store),
        Arc::new(notifier),
        &config.upload,
    );

    let api_state = AppState {
        service: Arc::new(service),
        presigned_url_expiry: config.presigned_url_expiry(),
    };

    info!("Photo store started successfully");

    serve_until(api_state, &config.api, shutdown_signal()).await?;

    info!("Photo store stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
