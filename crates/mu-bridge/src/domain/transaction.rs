//! Transaction ID for command/acknowledgement correlation.
//!
//! Uses random UUID v4 values; every outbound command gets a fresh one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transaction ID correlating one outbound command with its acknowledgement.
///
/// Minted once per command and never reused for the lifetime of the process.
/// The controller echoes it back verbatim in the `txid` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Mint a new random transaction ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated string form the controller echoes back
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for TransactionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_transaction_ids_are_unique() {
        let ids: HashSet<TransactionId> = (0..1000).map(|_| TransactionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display_is_hyphenated_uuid() {
        let id = TransactionId::new();
        let display = id.to_string();
        assert_eq!(display.len(), 36); // 8-4-4-4-12
        assert_eq!(display.matches('-').count(), 4);
    }

    #[test]
    fn test_parse_round_trips_display() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TransactionId::parse("not-a-txid").is_err());
        assert!(TransactionId::parse("").is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = TransactionId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }
}
