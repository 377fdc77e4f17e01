//! Configuration providers and the shared snapshot store.
//!
//! ## Providers
//!
//! - `YamlConfigProvider` - reads the `config.yaml` shared with the controller
//! - `StaticConfigProvider` - fixed snapshot for tests and development
//!
//! `ConfigStore` holds the current snapshot. Readers clone the `Arc` once at the
//! start of an operation; a reload swaps the whole `Arc`, so nobody observes a
//! mix of old and new fields.

use crate::domain::{ConfigError, ConfigSnapshot};
use crate::ports::ConfigProvider;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// StaticConfigProvider - Fixed snapshot for testing/development
// ============================================================================

/// Provider returning the same snapshot on every load.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    snapshot: ConfigSnapshot,
}

impl StaticConfigProvider {
    #[must_use]
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self { snapshot }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        Ok(self.snapshot.clone())
    }

    fn describe(&self) -> String {
        "static configuration".to_string()
    }
}

// ============================================================================
// YamlConfigProvider - config.yaml loading
// ============================================================================

/// YAML file provider.
///
/// # Config File Format
///
/// ```yaml
/// MUConnectorPort: 55557
/// MUConnectorIP: 127.0.0.1
/// MUConnectorUDP: 55556
/// MUExplorerIP: 127.0.0.1
/// MUExplorerPort: 55555
/// Version: 2.2
/// InitialProcessingParameters:
///   threshold: 0.8
/// ProbeInterval: 10s
/// StalenessThreshold: 30s
/// AckTimeout: 15s
/// ```
#[derive(Debug, Clone)]
pub struct YamlConfigProvider {
    path: PathBuf,
}

impl YamlConfigProvider {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a snapshot from YAML text.
    ///
    /// An empty document is an error: the file exists but says nothing.
    pub fn parse(content: &str) -> Result<ConfigSnapshot, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Parse("config is empty".into()));
        }
        let snapshot: ConfigSnapshot =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl ConfigProvider for YamlConfigProvider {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        let content = fs::read_to_string(&self.path).map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// ConfigStore - atomically swapped snapshot
// ============================================================================

/// Current configuration snapshot plus the provider that refreshes it.
pub struct ConfigStore {
    provider: Arc<dyn ConfigProvider>,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    /// Load the initial snapshot, falling back to defaults on failure.
    pub fn load(provider: Arc<dyn ConfigProvider>) -> Self {
        let snapshot = load_or_default(provider.as_ref());
        Self {
            provider,
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Store serving a fixed snapshot.
    pub fn fixed(snapshot: ConfigSnapshot) -> Self {
        Self::load(Arc::new(StaticConfigProvider::new(snapshot)))
    }

    /// Snapshot valid at the time of the call
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Re-read the provider and swap in the new snapshot.
    pub fn reload(&self) -> Arc<ConfigSnapshot> {
        info!(source = %self.provider.describe(), "Reloading configuration");
        let snapshot = Arc::new(load_or_default(self.provider.as_ref()));
        *self.current.write() = Arc::clone(&snapshot);
        info!(
            connector_port = snapshot.connector_port,
            explorer = %snapshot.controller_addr(),
            "Configuration reloaded"
        );
        snapshot
    }
}

fn load_or_default(provider: &dyn ConfigProvider) -> ConfigSnapshot {
    match provider.load().and_then(|s| s.validate().map(|_| s)) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(
                source = %provider.describe(),
                error = %e,
                "Failed to load configuration, using defaults"
            );
            ConfigSnapshot::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
MUConnectorPort: 6000
MUConnectorIP: 0.0.0.0
MUConnectorUDP: 6001
MUExplorerIP: 10.0.0.5
MUExplorerPort: 6002
Version: 3.1
InitialProcessingParameters:
  threshold: 0.8
  channels: [1, 2, 3]
AckTimeout: 500ms
"#;

    #[test]
    fn test_parse_full_file() {
        let config = YamlConfigProvider::parse(SAMPLE).unwrap();
        assert_eq!(config.connector_port, 6000);
        assert_eq!(config.connector_address, "0.0.0.0");
        assert_eq!(config.connector_udp_port, 6001);
        assert_eq!(config.explorer_address, "10.0.0.5");
        assert_eq!(config.explorer_port, 6002);
        assert_eq!(config.version, serde_json::json!(3.1));
        assert_eq!(config.initial_params["threshold"], serde_json::json!(0.8));
        assert_eq!(config.ack_timeout, Duration::from_millis(500));
        // Unspecified keys keep their defaults
        assert_eq!(config.probe_interval, Duration::from_secs(10));
        assert_eq!(config.staleness_threshold, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(matches!(
            YamlConfigProvider::parse("   "),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            YamlConfigProvider::parse("MUConnectorPort: [not, a, port]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        assert!(matches!(
            YamlConfigProvider::parse("MUExplorerPort: 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_quoted_ports_and_free_form_version() {
        let config = YamlConfigProvider::parse(
            "MUConnectorPort: \"6000\"\nMUConnectorUDP: ' 6001 '\nMUExplorerPort: 6002\nVersion: 2.2.1\n",
        )
        .unwrap();
        assert_eq!(config.connector_port, 6000);
        assert_eq!(config.connector_udp_port, 6001);
        assert_eq!(config.explorer_port, 6002);
        assert_eq!(config.version, serde_json::json!("2.2.1"));

        let panel = serde_json::to_value(config.panel_view()).unwrap();
        assert_eq!(panel["version"], "2.2.1");
        assert_eq!(panel["connectorPort"], 6000);
    }

    #[test]
    fn test_null_version_uses_default() {
        let config = YamlConfigProvider::parse("Version: ~\n").unwrap();
        assert_eq!(config.version, serde_json::json!(2.2));
    }

    #[test]
    fn test_bad_ports_rejected() {
        assert!(matches!(
            YamlConfigProvider::parse("MUConnectorPort: \"http\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            YamlConfigProvider::parse("MUExplorerPort: 70000"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        assert!(matches!(
            YamlConfigProvider::parse("AckTimeout: 18446744073709551615"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            YamlConfigProvider::parse("ProbeInterval: 999999999999999999m"),
            Err(ConfigError::Parse(_))
        ));

        // A store never hands out an unbounded timeout.
        let store = ConfigStore::fixed(ConfigSnapshot {
            ack_timeout: Duration::from_secs(u64::MAX),
            ..Default::default()
        });
        assert_eq!(store.current().ack_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let provider = Arc::new(YamlConfigProvider::new("/nonexistent/config.yaml"));
        assert!(matches!(provider.load(), Err(ConfigError::Io { .. })));

        let store = ConfigStore::load(provider);
        assert_eq!(*store.current(), ConfigSnapshot::default());
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MUExplorerPort: 7000").unwrap();

        let store = ConfigStore::load(Arc::new(YamlConfigProvider::new(file.path())));
        let before = store.current();
        assert_eq!(before.explorer_port, 7000);

        std::fs::write(file.path(), "MUExplorerPort: 7001\n").unwrap();
        let after = store.reload();

        assert_eq!(after.explorer_port, 7001);
        assert_eq!(store.current().explorer_port, 7001);
        // Holders of the old snapshot keep a consistent view.
        assert_eq!(before.explorer_port, 7000);
    }

    #[test]
    fn test_reload_of_broken_file_uses_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "MUExplorerPort: 7000\n").unwrap();
        let store = ConfigStore::load(Arc::new(YamlConfigProvider::new(file.path())));

        std::fs::write(file.path(), "MUExplorerPort: {").unwrap();
        let after = store.reload();
        assert_eq!(after.explorer_port, ConfigSnapshot::default().explorer_port);
    }

    #[test]
    fn test_fixed_store() {
        let snapshot = ConfigSnapshot {
            explorer_port: 1234,
            ..Default::default()
        };
        let store = ConfigStore::fixed(snapshot.clone());
        assert_eq!(*store.current(), snapshot);
        assert_eq!(*store.reload(), snapshot);
    }
}
