//! Bridge error types and their HTTP status mapping.

use crate::domain::transaction::TransactionId;
use serde::Serialize;

/// Errors produced by the correlation and transport layers.
///
/// `MalformedDatagram` and `UnmatchedAck` never reach an HTTP caller; they are
/// logged and counted by the receive path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Socket bind or send failure
    #[error("transport error: {0}")]
    Transport(String),

    /// No acknowledgement within the deadline
    #[error("ACK timeout")]
    Timeout,

    /// Unknown, never registered, or already claimed transaction
    #[error("no such transaction: {0}")]
    NoSuchTransaction(String),

    /// Command body rejected before anything was sent
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A transaction ID was registered twice
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(TransactionId),

    /// Inbound datagram could not be parsed
    #[error("malformed datagram: {0}")]
    MalformedDatagram(String),

    /// Acknowledgement for a transaction nobody is waiting on
    #[error("unmatched ack for txid {0}")]
    UnmatchedAck(String),
}

impl BridgeError {
    /// HTTP status code reported to the panel for this error
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::InvalidCommand(_) => 400,
            BridgeError::NoSuchTransaction(_) => 404,
            BridgeError::Timeout => 504,
            BridgeError::Transport(_)
            | BridgeError::DuplicateTransaction(_)
            | BridgeError::MalformedDatagram(_)
            | BridgeError::UnmatchedAck(_) => 500,
        }
    }

    /// JSON body in the panel's `{ok:false, error}` shape
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            ok: false,
            error: self.to_string(),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Transport(e.to_string())
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(BridgeError::Transport("boom".into()).status_code(), 500);
        assert_eq!(BridgeError::Timeout.status_code(), 504);
        assert_eq!(BridgeError::NoSuchTransaction("x".into()).status_code(), 404);
        assert_eq!(BridgeError::InvalidCommand("x".into()).status_code(), 400);
        assert_eq!(
            BridgeError::DuplicateTransaction(TransactionId::new()).status_code(),
            500
        );
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(BridgeError::Timeout.to_body()).unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "ACK timeout");
    }

    #[test]
    fn test_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Transport(msg) if msg.contains("address in use")));
    }
}
