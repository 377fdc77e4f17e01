//! # MU Connector
//!
//! Bridges the MUExplorer browser panel (HTTP) to the controller (UDP).
//!
//! ```text
//! mu-connector [config.yaml]
//! ```
//!
//! `MU_CONNECTOR_CONFIG` overrides the path argument. Log filtering follows
//! `RUST_LOG` (default `info`).

use anyhow::Result;
use connector_runtime::{resolve_config_path, ConnectorRuntime, CONFIG_ENV};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = resolve_config_path(std::env::var_os(CONFIG_ENV), std::env::args_os().skip(1));
    let runtime = ConnectorRuntime::new(config_path);

    let server = runtime.run();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Ctrl+C received");
        }
    }

    // Graceful shutdown
    runtime.shutdown();
    server.await
}
