//! # Kopia Exporter
//!
//! A Prometheus metrics exporter for Kopia snapshot inventories.
//!
//! ## Overview
//!
//! The exporter periodically runs `kopia snapshot list --json`, folds the
//! listing into a set of gauges and serves them for scraping:
//!
//! - Per-source backup status, size and last backup timestamp
//! - Repository connection status
//! - Exporter poll counters
//!
//! ## Quick Start
//!
//! ```no_run
//! use kopia_exporter::{
//!     client::KopiaClient, config::Settings, metrics::MetricsRegistry,
//!     probe::probe_connection, reconcile::Reconciler, server::start_server,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load configuration
//!     let settings = Settings::load(Some("config/default.toml"))?;
//!
//!     let client = KopiaClient::new(settings.kopia.clone());
//!     let metrics = Arc::new(MetricsRegistry::new()?);
//!     probe_connection(&client, &metrics).await;
//!
//!     let reconciler = Reconciler::new(client, metrics.clone(), "default");
//!     tokio::spawn(reconciler.run(settings.kopia.poll_interval()));
//!
//!     // Start HTTP server
//!     start_server(&settings.exporter.listen_address, metrics).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter can be configured via:
//! - TOML configuration file
//! - Environment variables (`KOPIA_PASSWORD`, `KOPIA_SERVER_URL`, ... or
//!   `KOPIA_EXPORTER__<SECTION>__<KEY>`)
//! - Command-line arguments
//!
//! See [`config::Settings`] for details.
//!
//! ## Modules
//!
//! - [`client`] - kopia command-line client
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling
//! - [`inventory`] - Snapshot listing parser
//! - [`metrics`] - Prometheus metrics definitions and registry state
//! - [`probe`] - Startup connection probe
//! - [`reconcile`] - Polling and reconciliation loop
//! - [`server`] - HTTP server for exposing metrics

pub mod client;
pub mod config;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod probe;
pub mod reconcile;
pub mod server;

pub use error::{KopiaError, Result};
