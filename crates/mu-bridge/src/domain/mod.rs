//! Domain types for the bridge.
//!
//! Transaction IDs, wire envelopes, the configuration snapshot and the error
//! taxonomy. Async infrastructure (registry, socket) lives in `adapters`.

pub mod config;
pub mod envelope;
pub mod error;
pub mod transaction;

pub use config::{ConfigError, ConfigSnapshot, PanelConfig};
pub use envelope::{AckEnvelope, CommandEnvelope, InboundDatagram};
pub use error::{BridgeError, BridgeResult, ErrorBody};
pub use transaction::TransactionId;
