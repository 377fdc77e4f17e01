//! Bridge configuration snapshot.
//!
//! Field names follow the `config.yaml` shared with the controller, so the
//! same file drives both processes. Every field has a default; a missing key
//! falls back to it rather than failing the load.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for every duration setting
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Immutable configuration snapshot.
///
/// Replaced wholesale on reload, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    /// HTTP port of the bridge
    #[serde(rename = "MUConnectorPort", with = "port_serde")]
    pub connector_port: u16,
    /// Bind address for HTTP and UDP; also sent to the controller as `reply_host`
    #[serde(rename = "MUConnectorIP")]
    pub connector_address: String,
    /// UDP port the bridge binds (0 = ephemeral)
    #[serde(rename = "MUConnectorUDP", with = "port_serde")]
    pub connector_udp_port: u16,
    /// Controller address
    #[serde(rename = "MUExplorerIP")]
    pub explorer_address: String,
    /// Controller UDP port
    #[serde(rename = "MUExplorerPort", with = "port_serde")]
    pub explorer_port: u16,
    /// Defaults for the panel form, opaque to the bridge
    #[serde(rename = "InitialProcessingParameters")]
    pub initial_params: Map<String, Value>,
    /// Echoed to the panel as written in the file (`2.2`, `"2.2.1"`, ...)
    #[serde(rename = "Version", deserialize_with = "version_or_default")]
    pub version: Value,
    /// Liveness probe cadence
    #[serde(rename = "ProbeInterval", with = "humantime_serde")]
    pub probe_interval: Duration,
    /// Close the socket after this long without a controller ping
    #[serde(rename = "StalenessThreshold", with = "humantime_serde")]
    pub staleness_threshold: Duration,
    /// How long a command waits for its acknowledgement
    #[serde(rename = "AckTimeout", with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Directory with the panel's static assets
    #[serde(rename = "StaticDir", skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
    /// Origins allowed to call the HTTP API; empty or `*` allows any
    #[serde(rename = "CorsOrigins")]
    pub cors_origins: Vec<String>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            connector_port: 55557,
            connector_address: "127.0.0.1".to_string(),
            connector_udp_port: 55556,
            explorer_address: "127.0.0.1".to_string(),
            explorer_port: 55555,
            initial_params: Map::new(),
            version: default_version(),
            probe_interval: Duration::from_secs(10),
            staleness_threshold: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(15),
            static_dir: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ConfigSnapshot {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connector_address.trim().is_empty() {
            return Err(ConfigError::Invalid("MUConnectorIP cannot be empty".into()));
        }
        if self.explorer_address.trim().is_empty() {
            return Err(ConfigError::Invalid("MUExplorerIP cannot be empty".into()));
        }
        if self.explorer_port == 0 {
            return Err(ConfigError::Invalid("MUExplorerPort cannot be 0".into()));
        }
        if self.probe_interval.is_zero() {
            return Err(ConfigError::Invalid("ProbeInterval cannot be 0".into()));
        }
        if self.staleness_threshold.is_zero() {
            return Err(ConfigError::Invalid("StalenessThreshold cannot be 0".into()));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::Invalid("AckTimeout cannot be 0".into()));
        }
        for (key, value) in [
            ("ProbeInterval", self.probe_interval),
            ("StalenessThreshold", self.staleness_threshold),
            ("AckTimeout", self.ack_timeout),
        ] {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{key} cannot exceed {}s",
                    MAX_DURATION.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// HTTP listen address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.connector_address, self.connector_port)
    }

    /// Local UDP bind address
    pub fn udp_bind_addr(&self) -> String {
        format!("{}:{}", self.connector_address, self.connector_udp_port)
    }

    /// Controller UDP address
    pub fn controller_addr(&self) -> String {
        format!("{}:{}", self.explorer_address, self.explorer_port)
    }

    /// View served to the panel by `/config` and `/reload`
    pub fn panel_view(&self) -> PanelConfig<'_> {
        PanelConfig {
            ok: true,
            connector_port: self.connector_port,
            connector_address: &self.connector_address,
            explorer_port: self.explorer_port,
            explorer_address: &self.explorer_address,
            connector_udp_port: self.connector_udp_port,
            initial_params: &self.initial_params,
            version: &self.version,
        }
    }
}

/// Panel-facing configuration fields
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig<'a> {
    pub ok: bool,
    pub connector_port: u16,
    pub connector_address: &'a str,
    pub explorer_port: u16,
    pub explorer_address: &'a str,
    pub connector_udp_port: u16,
    pub initial_params: &'a Map<String, Value>,
    pub version: &'a Value,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },
    /// File is not valid YAML or has wrongly typed fields
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// Values parsed but are unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_version() -> Value {
    Value::from(2.2)
}

/// Any YAML value is kept; an explicit null falls back to the default.
fn version_or_default<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(if value.is_null() { default_version() } else { value })
}

/// Port fields accept a number or a numeric string (`55557` or `"55557"`).
mod port_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(port: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(*port)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        let number = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid port {s:?}")))?,
        };
        u16::try_from(number)
            .map_err(|_| serde::de::Error::custom(format!("port {number} out of range")))
    }
}

/// Duration fields accept `"10s"`, `"500ms"`, `"2m"` or a bare number of seconds.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map_err(|_| "invalid minutes")?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or("minutes out of range")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
