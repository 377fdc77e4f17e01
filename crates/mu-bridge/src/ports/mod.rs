//! Ports (trait seams) between the gateway and its infrastructure.

pub mod outbound;

pub use outbound::{CommandTransport, ConfigProvider};
