//! # Runtime Lifecycle Tests
//!
//! Start the runtime from a config file on disk, reload it, shut it down.

use std::sync::Arc;
use std::time::Duration;

use connector_runtime::ConnectorRuntime;
use tokio::time::timeout;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    std::fs::write(file.path(), contents).expect("write config");
    file
}

#[tokio::test]
async fn test_runtime_starts_and_shuts_down() {
    // Arrange: ephemeral HTTP port so tests never collide
    let file = write_config("MUConnectorPort: 0\nMUConnectorUDP: 0\nMUExplorerPort: 55555\n");
    let runtime = Arc::new(ConnectorRuntime::new(file.path().to_path_buf()));

    // Act
    let server = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.shutdown();

    // Assert
    let result = timeout(Duration::from_secs(5), server)
        .await
        .expect("Should stop within timeout")
        .expect("Server task should not panic");
    assert!(result.is_ok());
    assert!(!runtime.service().transport().is_open().await);
}

#[tokio::test]
async fn test_missing_config_uses_defaults() {
    let runtime = ConnectorRuntime::new("/nonexistent/@MUExplorer/config.yaml".into());
    let config = runtime.service().config().current();

    assert_eq!(config.connector_port, 55557);
    assert_eq!(config.explorer_port, 55555);
    assert_eq!(config.connector_udp_port, 55556);
}

#[tokio::test]
async fn test_reload_reads_edited_file() {
    let file = write_config("MUExplorerPort: 6000\n");
    let runtime = ConnectorRuntime::new(file.path().to_path_buf());
    assert_eq!(runtime.service().config().current().explorer_port, 6000);

    std::fs::write(file.path(), "MUExplorerPort: 6001\n").unwrap();
    let reloaded = runtime.service().reload();

    assert_eq!(reloaded.explorer_port, 6001);
}
