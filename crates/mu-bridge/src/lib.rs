//! MU Connector bridge - HTTP panel to UDP controller command relay.
//!
//! A browser panel posts JSON commands over HTTP; the bridge forwards them as
//! UDP datagrams to the controller process (MUExplorer) and correlates the
//! controller's acknowledgements back to waiting HTTP requests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        MU CONNECTOR                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │   POST /send          GET /wait-ack        GET /config ...    │
//! │        │                    ▲                                 │
//! │  ┌─────┴────────────────────┴─────┐     ┌────────────────┐   │
//! │  │         CommandGateway         │     │  ConfigStore   │   │
//! │  └─────┬────────────────────┬─────┘     │ (Arc snapshot) │   │
//! │        │ register           │ claim     └────────────────┘   │
//! │  ┌─────┴────────────────────┴─────┐                          │
//! │  │   AckRegistry (txid → oneshot) │◀── resolve ──┐           │
//! │  └────────────────────────────────┘              │           │
//! │  ┌───────────────────────────────────────────────┴───────┐   │
//! │  │ DatagramTransport: receive task + liveness probe task │   │
//! │  └──────────────────────────┬────────────────────────────┘   │
//! └─────────────────────────────┼────────────────────────────────┘
//!                               │ UDP (JSON)
//!                               ▼
//!                        controller process
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mu_bridge::{BridgeService, ConfigStore, YamlConfigProvider};
//!
//! let config = Arc::new(ConfigStore::load(Arc::new(YamlConfigProvider::new("config.yaml"))));
//! let service = BridgeService::new(config);
//! service.run(shutdown_signal()).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod gateway;
pub mod middleware;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use adapters::{
    AckRegistry, CompletionHandle, ConfigStore, DatagramTransport, StaticConfigProvider,
    YamlConfigProvider,
};
pub use domain::{
    AckEnvelope, BridgeError, BridgeResult, CommandEnvelope, ConfigError, ConfigSnapshot,
    InboundDatagram, TransactionId,
};
pub use gateway::CommandGateway;
pub use ports::{CommandTransport, ConfigProvider};
pub use service::BridgeService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
