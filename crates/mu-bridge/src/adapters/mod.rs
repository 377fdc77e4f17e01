//! Adapters for the bridge.
//!
//! Infrastructure implementations: configuration loading, the ack registry
//! and the UDP transport.

pub mod config;
pub mod registry;
pub mod transport;

pub use config::{ConfigStore, StaticConfigProvider, YamlConfigProvider};
pub use registry::{AckRegistry, CompletionHandle, Outcome, RegistryStats, RegistryStatsSnapshot};
pub use transport::{DatagramTransport, TransportStats, TransportStatsSnapshot};
