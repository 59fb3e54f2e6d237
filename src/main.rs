use anyhow::Result;
use clap::Parser;
use kopia_exporter::{
    client::KopiaClient,
    config::{LogFormat, Settings},
    metrics::MetricsRegistry,
    probe::probe_connection,
    reconcile::Reconciler,
    server::start_server,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Kopia Exporter - Prometheus metrics exporter for Kopia snapshot inventories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "KOPIA_EXPORTER_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let settings = Settings::load(args.config.as_deref())?;

    // Initialize logging
    init_logging(&settings.exporter.log_level, settings.exporter.log_format);

    info!("Starting Kopia Exporter");
    info!("Kopia server: {}", settings.kopia.server_url);
    info!("Listen address: {}", settings.exporter.listen_address);

    settings.kopia.ensure_directories()?;

    let client = KopiaClient::new(settings.kopia.clone());
    let metrics = Arc::new(MetricsRegistry::new()?);
    info!("Metrics registry initialized");

    probe_connection(&client, &metrics).await;

    let reconciler = Reconciler::new(
        client,
        metrics.clone(),
        settings.kopia.fallback_source.clone(),
    );
    tokio::spawn(reconciler.run(settings.kopia.poll_interval()));

    // Start HTTP server
    if let Err(e) = start_server(&settings.exporter.listen_address, metrics).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(log_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
