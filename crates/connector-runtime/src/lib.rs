//! # MU Connector Runtime
//!
//! Wires the bridge together for the `mu-connector` binary.
//!
//! ## Startup Sequence
//!
//! 1. Resolve the config path (env, CLI argument, default)
//! 2. Load `config.yaml`, falling back to defaults
//! 3. Start the SIGHUP reload listener
//! 4. Serve HTTP until shutdown, then close the UDP socket

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use mu_bridge::{BridgeService, ConfigStore, YamlConfigProvider};
use tokio::sync::watch;
use tracing::{error, info};

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "MU_CONNECTOR_CONFIG";

/// Config shared with the controller, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "../@MUExplorer/config.yaml";

/// Pick the config path: env var, else first CLI argument, else the default.
pub fn resolve_config_path<I>(env_value: Option<OsString>, mut args: I) -> PathBuf
where
    I: Iterator<Item = OsString>,
{
    env_value
        .filter(|v| !v.is_empty())
        .or_else(|| args.next())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// The bridge process: service plus its shutdown signal.
pub struct ConnectorRuntime {
    service: Arc<BridgeService>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectorRuntime {
    /// Load configuration from `config_path` and build the service.
    pub fn new(config_path: PathBuf) -> Self {
        info!(path = %config_path.display(), "Loading configuration");
        let provider = Arc::new(YamlConfigProvider::new(config_path));
        Self::with_store(Arc::new(ConfigStore::load(provider)))
    }

    pub fn with_store(config: Arc<ConfigStore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            service: Arc::new(BridgeService::new(config)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn service(&self) -> &Arc<BridgeService> {
        &self.service
    }

    /// Serve until [`ConnectorRuntime::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        let config = self.service.config().current();
        info!("===========================================");
        info!("  MU Connector v{}", mu_bridge::VERSION);
        info!("===========================================");
        info!(
            http = %config.http_addr(),
            udp = %config.udp_bind_addr(),
            explorer = %config.controller_addr(),
            "MUConnector starting"
        );

        self.spawn_reload_listener();

        let mut shutdown = self.shutdown_rx.clone();
        self.service
            .run(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .with_context(|| format!("HTTP server on {} failed", config.http_addr()))
    }

    /// Signal shutdown: the HTTP server drains and the socket closes.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }

    #[cfg(unix)]
    fn spawn_reload_listener(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGHUP, reload via /reload only");
                return;
            }
        };
        let service = Arc::clone(&self.service);
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = hangups.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("SIGHUP received, reloading configuration");
                        service.reload();
                    }
                }
            }
        });
    }

    #[cfg(not(unix))]
    fn spawn_reload_listener(&self) {}
}
