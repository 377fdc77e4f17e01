//! Outbound ports for the bridge.

use crate::domain::{BridgeResult, CommandEnvelope, ConfigError, ConfigSnapshot};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Source of configuration snapshots (file, static values, ...).
pub trait ConfigProvider: Send + Sync {
    /// Load a fresh snapshot.
    fn load(&self) -> Result<ConfigSnapshot, ConfigError>;

    /// Human-readable description of the source, for logs
    fn describe(&self) -> String;
}

/// Datagram channel to the controller, as seen by the command gateway.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Open the channel if it is closed and return the local reply address.
    async fn ensure_open(&self) -> BridgeResult<SocketAddr>;

    /// Transmit one command envelope to the controller.
    async fn send(&self, envelope: &CommandEnvelope) -> BridgeResult<()>;
}
