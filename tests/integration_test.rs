//! Integration tests for the Kopia exporter
//!
//! These tests stand in for the kopia binary with small shell scripts

#![cfg(unix)]

use kopia_exporter::{
    client::KopiaClient,
    config::{KopiaConfig, Settings},
    metrics::{BackupStatus, MetricsRegistry, PollResult},
    probe::probe_connection,
    reconcile::Reconciler,
    KopiaError,
};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

const LISTING: &str = r#"[{"id":"s1","source":"docs","endTime":"2024-01-01T00:00:00Z","size":1000},{"id":"s2","source":{"host":"nas","userName":"root","path":"/srv"},"endTime":"2024-01-02T00:00:00Z","stats":{"totalSize":42}}]"#;

/// Write every fake kopia script once, before any test spawns a process.
fn scripts() -> &'static PathBuf {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("kopia-exporter-it-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let fixtures = [
            (
                "list-ok",
                format!(
                    "#!/bin/sh\necho 'warning: update available' >&2\necho '{}'\n",
                    LISTING
                ),
            ),
            ("list-garbage", "#!/bin/sh\necho 'not valid structured data'\n".to_string()),
            (
                "fail",
                "#!/bin/sh\necho 'ERROR: unable to connect to repository server' >&2\nexit 1\n"
                    .to_string(),
            ),
            ("hang", "#!/bin/sh\nexec sleep 30\n".to_string()),
            ("echo-args", "#!/bin/sh\necho \"$@\"\n".to_string()),
            (
                "echo-env",
                "#!/bin/sh\necho \"$KOPIA_CACHE_DIRECTORY\"\n".to_string(),
            ),
        ];

        for (name, body) in fixtures {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        dir
    })
}

/// Helper to create a kopia config pointing at a fake binary
fn create_test_config(script: &str) -> KopiaConfig {
    let mut config = Settings::default().kopia;
    config.binary = scripts().join(script).to_string_lossy().into_owned();
    config.server_url = "http://kopia-test:51515".to_string();
    config.password = "test-secret".to_string();
    config.config_dir = PathBuf::from("/tmp/kopia-exporter-test-config");
    config.command_timeout_seconds = 5;
    config
}

#[tokio::test]
async fn test_list_snapshots_returns_stdout_only() {
    let client = KopiaClient::new(create_test_config("list-ok"));

    let raw = client.list_snapshots().await.unwrap();

    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with('['));
    assert!(!text.contains("warning"));
}

#[tokio::test]
async fn test_list_snapshots_arguments() {
    let mut config = create_test_config("echo-args");
    config.all_sources = true;
    let client = KopiaClient::new(config);

    let raw = client.list_snapshots().await.unwrap();

    let args = String::from_utf8(raw).unwrap();
    assert_eq!(
        args.trim(),
        "--config-file /tmp/kopia-exporter-test-config/repository.config snapshot list --json --no-progress --all"
    );
}

#[tokio::test]
async fn test_cache_directory_passed_through() {
    let mut config = create_test_config("echo-env");
    config.cache_dir = Some(PathBuf::from("/tmp/kopia-exporter-cache"));
    let client = KopiaClient::new(config);

    let raw = client.list_snapshots().await.unwrap();
    assert_eq!(String::from_utf8(raw).unwrap().trim(), "/tmp/kopia-exporter-cache");
}

#[tokio::test]
async fn test_non_zero_exit_includes_output() {
    let client = KopiaClient::new(create_test_config("fail"));

    let err = client.list_snapshots().await.unwrap_err();

    assert!(matches!(err, KopiaError::Command { .. }));
    assert!(err.is_connectivity());
    assert!(err.to_string().contains("unable to connect"));
}

#[tokio::test]
async fn test_hung_command_times_out() {
    let mut config = create_test_config("hang");
    config.command_timeout_seconds = 1;
    let client = KopiaClient::new(config);

    let started = std::time::Instant::now();
    let err = client.list_snapshots().await.unwrap_err();

    assert!(matches!(err, KopiaError::Timeout { seconds: 1, .. }));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[tokio::test]
async fn test_connect_arguments() {
    let client = KopiaClient::new(create_test_config("echo-args"));

    let output = client.connect().await.unwrap();

    let args = String::from_utf8(output.stdout).unwrap();
    assert!(args.contains(
        "repository connect server --url http://kopia-test:51515 --password test-secret --no-check-for-updates --no-progress"
    ));
}

#[tokio::test]
async fn test_probe_success_sets_repository_up() {
    let client = KopiaClient::new(create_test_config("echo-args"));
    let metrics = MetricsRegistry::new().unwrap();

    assert!(probe_connection(&client, &metrics).await);
    assert!(metrics.repository_up());
}

#[tokio::test]
async fn test_probe_failure_is_not_fatal() {
    let client = KopiaClient::new(create_test_config("fail"));
    let metrics = MetricsRegistry::new().unwrap();
    metrics.set_repository_status(true);

    assert!(!probe_connection(&client, &metrics).await);
    assert!(!metrics.repository_up());
    assert!(metrics.encode().unwrap().contains("kopia_repository_status 0"));
}

#[tokio::test]
async fn test_reconcile_with_kopia_listing() {
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let reconciler = Reconciler::new(
        KopiaClient::new(create_test_config("list-ok")),
        metrics.clone(),
        "default",
    );

    assert_eq!(reconciler.poll_once().await, PollResult::Success);

    let snapshot = metrics.snapshot();
    assert!(snapshot.repository_up);
    assert_eq!(snapshot.samples.len(), 2);
    assert_eq!(snapshot.samples["docs"].size_bytes, Some(1000));
    assert_eq!(snapshot.samples["docs"].last_backup_unix_time, Some(1704067200));
    assert_eq!(snapshot.samples["root@nas:/srv"].size_bytes, Some(42));
}

#[tokio::test]
async fn test_reconcile_failed_command() {
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let reconciler = Reconciler::new(
        KopiaClient::new(create_test_config("fail")),
        metrics.clone(),
        "default",
    );

    assert_eq!(reconciler.poll_once().await, PollResult::FetchError);

    let snapshot = metrics.snapshot();
    assert!(!snapshot.repository_up);
    assert_eq!(snapshot.samples.len(), 1);
    assert_eq!(snapshot.samples["default"].status, BackupStatus::Failure);
}

#[tokio::test]
async fn test_reconcile_garbage_output() {
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    metrics.set_repository_status(true);
    let before = metrics.snapshot();
    let reconciler = Reconciler::new(
        KopiaClient::new(create_test_config("list-garbage")),
        metrics.clone(),
        "default",
    );

    assert_eq!(reconciler.poll_once().await, PollResult::ParseError);
    assert_eq!(metrics.snapshot(), before);
}
