//! Ack Registry - at-most-once correlation of commands and acknowledgements.
//!
//! Maps transaction IDs to the oneshot sender of a waiting HTTP request.
//!
//! Flow:
//! 1. Gateway mints a `TransactionId` and calls `register()` to get a handle
//! 2. Gateway sends the command datagram
//! 3. Receive task gets the controller's reply and calls `resolve()`
//! 4. The waiter's deadline (or the sweeper) calls `expire()`
//!
//! `resolve()` and `expire()` both start with `DashMap::remove`, which is atomic
//! per key: whichever runs first owns the entry, the other sees nothing.

use crate::domain::{AckEnvelope, BridgeError, BridgeResult, TransactionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Final outcome of a pending completion
pub type Outcome = Result<AckEnvelope, BridgeError>;

/// A command waiting for its acknowledgement
struct PendingCompletion {
    /// Channel to deliver the outcome
    sender: oneshot::Sender<Outcome>,
    /// When the command was registered
    registered_at: Instant,
    /// When the command times out
    deadline: Instant,
}

/// Receiving side of a pending completion.
///
/// An outcome delivered before anyone awaits the handle is buffered in it.
#[derive(Debug)]
pub struct CompletionHandle {
    txid: TransactionId,
    deadline: Instant,
    receiver: oneshot::Receiver<Outcome>,
}

impl CompletionHandle {
    pub fn txid(&self) -> TransactionId {
        self.txid
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the outcome until `until`.
    ///
    /// Returns `None` if `until` passes first; the handle stays usable so the
    /// caller can check again after retiring the registry entry.
    pub async fn wait_until(&mut self, until: Instant) -> Option<Outcome> {
        match tokio::time::timeout_at(until, &mut self.receiver).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => Some(Err(BridgeError::NoSuchTransaction(self.txid.to_string()))),
            Err(_) => None,
        }
    }

    /// Take the outcome if one has been delivered.
    ///
    /// A registry entry that was cancelled without an outcome reads as
    /// `NoSuchTransaction`.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                Some(Err(BridgeError::NoSuchTransaction(self.txid.to_string())))
            }
        }
    }
}

/// Statistics for the registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Total completions registered
    pub total_registered: AtomicU64,
    /// Total resolved by a matching ack
    pub total_resolved: AtomicU64,
    /// Total expired by deadline
    pub total_expired: AtomicU64,
    /// Total cancelled (send rollback)
    pub total_cancelled: AtomicU64,
    /// Acks that matched no pending completion
    pub total_unmatched: AtomicU64,
}

impl RegistryStats {
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            resolved: self.total_resolved.load(Ordering::Relaxed),
            expired: self.total_expired.load(Ordering::Relaxed),
            cancelled: self.total_cancelled.load(Ordering::Relaxed),
            unmatched: self.total_unmatched.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RegistryStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStatsSnapshot {
    pub registered: u64,
    pub resolved: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub unmatched: u64,
}

/// Registry of pending completions keyed by transaction ID.
#[derive(Default)]
pub struct AckRegistry {
    pending: DashMap<TransactionId, PendingCompletion>,
    stats: Arc<RegistryStats>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending completion for `txid`.
    ///
    /// Fails with `DuplicateTransaction` if `txid` is already registered; the
    /// existing entry is left untouched.
    pub fn register(&self, txid: TransactionId, deadline: Instant) -> BridgeResult<CompletionHandle> {
        let (sender, receiver) = oneshot::channel();

        match self.pending.entry(txid) {
            Entry::Occupied(_) => {
                warn!(txid = %txid, "Transaction registered twice");
                return Err(BridgeError::DuplicateTransaction(txid));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCompletion {
                    sender,
                    registered_at: Instant::now(),
                    deadline,
                });
            }
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(txid = %txid, "Registered pending completion");

        Ok(CompletionHandle {
            txid,
            deadline,
            receiver,
        })
    }

    /// Fulfil the completion for `txid` with an acknowledgement.
    ///
    /// Returns false (and counts an unmatched ack) if `txid` is not registered,
    /// e.g. the ack arrived after its deadline.
    pub fn resolve(&self, txid: TransactionId, ack: AckEnvelope) -> bool {
        let Some((_, pending)) = self.pending.remove(&txid) else {
            self.record_unmatched(&txid.to_string());
            return false;
        };

        self.stats.total_resolved.fetch_add(1, Ordering::Relaxed);
        let response_time = pending.registered_at.elapsed();

        if pending.sender.send(Ok(ack)).is_err() {
            // The waiter gave up; the entry is still retired.
            debug!(txid = %txid, "Ack resolved after waiter dropped");
        } else {
            debug!(
                txid = %txid,
                response_time_ms = response_time.as_millis() as u64,
                "Resolved pending completion"
            );
        }
        true
    }

    /// Fulfil the completion for `txid` with a timeout.
    ///
    /// Returns false if `txid` is not registered (already resolved or expired).
    pub fn expire(&self, txid: TransactionId) -> bool {
        let Some((_, pending)) = self.pending.remove(&txid) else {
            return false;
        };

        self.stats.total_expired.fetch_add(1, Ordering::Relaxed);
        warn!(
            txid = %txid,
            elapsed_ms = pending.registered_at.elapsed().as_millis() as u64,
            "ACK timeout"
        );
        let _ = pending.sender.send(Err(BridgeError::Timeout));
        true
    }

    /// Drop the completion for `txid` without an outcome.
    pub fn cancel(&self, txid: TransactionId) -> bool {
        if self.pending.remove(&txid).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(txid = %txid, "Cancelled pending completion");
            true
        } else {
            false
        }
    }

    /// Expire every completion whose deadline has passed.
    ///
    /// Returns the number of completions expired by this call.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        // Collected first: expiring while iterating would deadlock the shard.
        overdue.into_iter().filter(|txid| self.expire(*txid)).count()
    }

    /// Count an acknowledgement nobody was waiting for.
    pub fn record_unmatched(&self, raw_txid: &str) {
        self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
        let error = BridgeError::UnmatchedAck(raw_txid.to_string());
        warn!(txid = raw_txid, error = %error, "No waiter for txid, ignoring");
    }

    pub fn is_pending(&self, txid: &TransactionId) -> bool {
        self.pending.contains_key(txid)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}
