//! Startup connection probe.

use crate::client::KopiaClient;
use crate::metrics::MetricsRegistry;
use tracing::{error, info};

/// Connect to the repository server once and record the result.
///
/// A failed connection is logged, not returned: the exporter keeps serving
/// with the repository reported down.
pub async fn probe_connection(client: &KopiaClient, metrics: &MetricsRegistry) -> bool {
    match client.connect().await {
        Ok(_) => {
            info!("Successfully connected to Kopia server");
            metrics.set_repository_status(true);
            true
        }
        Err(e) => {
            error!("Error connecting to Kopia server: {}", e);
            metrics.set_repository_status(false);
            false
        }
    }
}
