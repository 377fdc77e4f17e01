//! JSON datagram envelopes exchanged with the controller.
//!
//! ```text
//! bridge -> controller   {..command fields, txid, reply_host, reply_port}
//! bridge -> controller   {cmd: "ping"}
//! controller -> bridge   {cmd: "ping"}
//! controller -> bridge   {txid, ..result fields}
//! ```

use crate::domain::error::BridgeError;
use crate::domain::transaction::TransactionId;
use serde::Serialize;
use serde_json::{Map, Value};

/// Command name used for liveness probes in both directions
pub const PING_CMD: &str = "ping";

/// Field names injected into every outbound command
pub const TXID_FIELD: &str = "txid";
pub const REPLY_HOST_FIELD: &str = "reply_host";
pub const REPLY_PORT_FIELD: &str = "reply_port";

/// Outbound command: caller payload plus the correlation and reply fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    txid: TransactionId,
    fields: Map<String, Value>,
}

impl CommandEnvelope {
    /// Build an envelope from the caller's command object.
    ///
    /// Caller-supplied `txid`, `reply_host` or `reply_port` fields are
    /// overwritten.
    pub fn new(
        txid: TransactionId,
        mut command: Map<String, Value>,
        reply_host: &str,
        reply_port: u16,
    ) -> Self {
        command.insert(TXID_FIELD.into(), Value::String(txid.to_string()));
        command.insert(REPLY_HOST_FIELD.into(), Value::String(reply_host.to_string()));
        command.insert(REPLY_PORT_FIELD.into(), Value::from(reply_port));
        Self {
            txid,
            fields: command,
        }
    }

    pub fn txid(&self) -> TransactionId {
        self.txid
    }

    /// Command name, when the caller supplied one
    pub fn cmd(&self) -> Option<&str> {
        self.fields.get("cmd").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Encode for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(&self.fields).map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

/// Acknowledgement returned by the controller.
///
/// The body is opaque to the bridge and handed back to the HTTP caller as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AckEnvelope {
    #[serde(skip)]
    txid: TransactionId,
    body: Map<String, Value>,
}

impl AckEnvelope {
    pub fn new(txid: TransactionId, body: Map<String, Value>) -> Self {
        Self { txid, body }
    }

    pub fn txid(&self) -> TransactionId {
        self.txid
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// Classified inbound datagram
#[derive(Debug, Clone, PartialEq)]
pub enum InboundDatagram {
    /// Liveness signal from the controller
    Ping,
    /// Reply carrying a transaction ID (not yet validated against the registry)
    Ack {
        txid: String,
        body: Map<String, Value>,
    },
    /// Valid JSON object with neither shape
    Unrecognized(Map<String, Value>),
}

impl InboundDatagram {
    /// Parse and classify raw datagram bytes.
    ///
    /// Liveness is checked first so that a `{cmd:"ping"}` is never treated as
    /// an acknowledgement.
    pub fn parse(bytes: &[u8]) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::MalformedDatagram(e.to_string()))?;

        let Value::Object(body) = value else {
            return Err(BridgeError::MalformedDatagram(
                "datagram is not a JSON object".into(),
            ));
        };

        if body.get("cmd").and_then(Value::as_str) == Some(PING_CMD) {
            return Ok(InboundDatagram::Ping);
        }

        match body.get(TXID_FIELD) {
            Some(Value::String(txid)) => Ok(InboundDatagram::Ack {
                txid: txid.clone(),
                body,
            }),
            Some(Value::Null) | None => Ok(InboundDatagram::Unrecognized(body)),
            Some(other) => Ok(InboundDatagram::Ack {
                txid: other.to_string(),
                body,
            }),
        }
    }
}

/// Encoded liveness probe sent to the controller
pub fn ping_datagram() -> Vec<u8> {
    // Serialising a literal map cannot fail.
    serde_json::to_vec(&serde_json::json!({ "cmd": PING_CMD })).unwrap_or_default()
}
