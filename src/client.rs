//! Kopia command-line client.
//!
//! This module wraps the `kopia` binary: listing snapshots for the
//! reconciliation loop and connecting to the repository server for the
//! startup probe.

use crate::config::KopiaConfig;
use crate::error::{KopiaError, Result};
use std::future::Future;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Anything that can produce a raw snapshot inventory.
///
/// The reconciliation loop is generic over this so it can be driven without
/// a kopia binary.
pub trait InventorySource: Send + Sync {
    /// Fetch the raw, unparsed inventory listing.
    fn fetch_inventory(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Captured output of a finished kopia invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: Vec<u8>,
    /// Standard error
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Both streams as one lossy string, stdout first.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !text.is_empty() && !stderr.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
        text
    }
}

/// Kopia CLI client.
#[derive(Clone)]
pub struct KopiaClient {
    config: KopiaConfig,
}

impl KopiaClient {
    /// Create a new kopia client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kopia_exporter::client::KopiaClient;
    /// use kopia_exporter::config::Settings;
    ///
    /// let settings = Settings::load(None).unwrap();
    /// let client = KopiaClient::new(settings.kopia);
    /// ```
    pub fn new(config: KopiaConfig) -> Self {
        Self { config }
    }

    /// Connect to the repository server.
    pub async fn connect(&self) -> Result<CommandOutput> {
        let args = [
            "repository",
            "connect",
            "server",
            "--url",
            self.config.server_url.as_str(),
            "--password",
            self.config.password.as_str(),
            "--no-check-for-updates",
            "--no-progress",
        ];
        self.run("repository connect", &args).await
    }

    /// List snapshots as JSON.
    ///
    /// Only stdout is returned; stderr is diagnostics and would corrupt the
    /// JSON if merged.
    pub async fn list_snapshots(&self) -> Result<Vec<u8>> {
        let mut args = vec!["snapshot", "list", "--json", "--no-progress"];
        if self.config.all_sources {
            args.push("--all");
        }

        let output = self.run("snapshot list", &args).await?;
        if !output.stderr.is_empty() {
            debug!(
                "kopia snapshot list stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        Ok(output.stdout)
    }

    async fn run(&self, command: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--config-file")
            .arg(self.config.config_file())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cache_dir) = &self.config.cache_dir {
            cmd.env("KOPIA_CACHE_DIRECTORY", cache_dir);
        }

        debug!("Running {} {}", self.config.binary, command);

        let child = cmd.spawn().map_err(|source| KopiaError::Spawn {
            command: command.to_string(),
            source,
        })?;

        // Dropping the wait future on timeout kills the child
        let output = match self.config.command_timeout() {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| KopiaError::Timeout {
                    command: command.to_string(),
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        let captured = CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if !output.status.success() {
            return Err(KopiaError::Command {
                command: command.to_string(),
                status: output.status.to_string(),
                output: captured.combined(),
            });
        }

        Ok(captured)
    }
}

impl InventorySource for KopiaClient {
    async fn fetch_inventory(&self) -> Result<Vec<u8>> {
        self.list_snapshots().await
    }
}
