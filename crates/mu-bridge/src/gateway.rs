//! Command gateway: submit a command, later await its acknowledgement.
//!
//! `submit` registers the completion *before* the datagram leaves, so an ack
//! that beats the HTTP client's `/wait-ack` call is buffered in the parked
//! handle rather than lost.

use crate::adapters::config::ConfigStore;
use crate::adapters::registry::{AckRegistry, CompletionHandle};
use crate::domain::{AckEnvelope, BridgeError, BridgeResult, CommandEnvelope, TransactionId};
use crate::ports::CommandTransport;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bridges HTTP callers to the controller through the registry and transport.
pub struct CommandGateway {
    config: Arc<ConfigStore>,
    registry: Arc<AckRegistry>,
    transport: Arc<dyn CommandTransport>,
    /// Handles of submitted commands nobody has waited on yet
    parked: DashMap<TransactionId, CompletionHandle>,
}

impl CommandGateway {
    pub fn new(
        config: Arc<ConfigStore>,
        registry: Arc<AckRegistry>,
        transport: Arc<dyn CommandTransport>,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            parked: DashMap::new(),
        }
    }

    /// Send a command to the controller without waiting for its reply.
    pub async fn submit(&self, command: Value) -> BridgeResult<TransactionId> {
        let Value::Object(fields) = command else {
            return Err(BridgeError::InvalidCommand(
                "command must be a JSON object".into(),
            ));
        };
        if !matches!(fields.get("cmd"), Some(Value::String(cmd)) if !cmd.is_empty()) {
            return Err(BridgeError::InvalidCommand(
                "command requires a string `cmd` field".into(),
            ));
        }

        let config = self.config.current();
        let local = self.transport.ensure_open().await?;

        let txid = TransactionId::new();
        let envelope = CommandEnvelope::new(txid, fields, &config.connector_address, local.port());

        let handle = self
            .registry
            .register(txid, Instant::now() + config.ack_timeout)?;
        self.parked.insert(txid, handle);

        if let Err(e) = self.transport.send(&envelope).await {
            self.registry.cancel(txid);
            self.parked.remove(&txid);
            return Err(e);
        }

        info!(
            txid = %txid,
            cmd = envelope.cmd().unwrap_or_default(),
            "Sending command to controller"
        );
        Ok(txid)
    }

    /// Wait for the acknowledgement of a submitted command.
    ///
    /// Claims the parked handle, so each transaction can be awaited once.
    /// Waits at most `timeout` (capped by the transaction's own deadline).
    pub async fn await_result(
        &self,
        txid: &str,
        timeout: Option<Duration>,
    ) -> BridgeResult<AckEnvelope> {
        let id = TransactionId::parse(txid)
            .map_err(|_| BridgeError::NoSuchTransaction(txid.to_string()))?;
        let Some((_, mut handle)) = self.parked.remove(&id) else {
            return Err(BridgeError::NoSuchTransaction(txid.to_string()));
        };

        let until = match timeout {
            Some(timeout) => Instant::now()
                .checked_add(timeout)
                .map_or(handle.deadline(), |at| at.min(handle.deadline())),
            None => handle.deadline(),
        };

        if let Some(outcome) = handle.wait_until(until).await {
            log_outcome(id, &outcome);
            return outcome;
        }

        // Retire the entry; a resolve that won the race is still in the handle.
        self.registry.expire(id);
        let outcome = handle.try_outcome().unwrap_or(Err(BridgeError::Timeout));
        log_outcome(id, &outcome);
        outcome
    }

    /// Expire overdue registry entries and drop parked handles nobody claimed.
    ///
    /// A handle is kept for one extra `ack_timeout` past its deadline so a
    /// slow client still gets the `Timeout` outcome.
    pub fn sweep(&self) -> usize {
        let expired = self.registry.expire_overdue();

        let grace = self.config.current().ack_timeout;
        let now = Instant::now();
        let before = self.parked.len();
        self.parked.retain(|_, handle| handle.deadline() + grace > now);
        let dropped = before.saturating_sub(self.parked.len());

        if expired > 0 || dropped > 0 {
            debug!(expired, dropped, "Swept pending completions");
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    pub fn registry(&self) -> &Arc<AckRegistry> {
        &self.registry
    }
}

fn log_outcome(txid: TransactionId, outcome: &BridgeResult<AckEnvelope>) {
    match outcome {
        Ok(_) => info!(txid = %txid, "ACK resolved"),
        Err(e) => warn!(txid = %txid, error = %e, "ACK rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConfigSnapshot;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records sent envelopes; optionally fails every send
    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<CommandEnvelope>>,
        fail_sends: AtomicBool,
    }

    #[async_trait]
    impl CommandTransport for FakeTransport {
        async fn ensure_open(&self) -> BridgeResult<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 40000)))
        }

        async fn send(&self, envelope: &CommandEnvelope) -> BridgeResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(BridgeError::Transport("network unreachable".into()));
            }
            self.sent.lock().push(envelope.clone());
            Ok(())
        }
    }

    fn gateway_with(ack_timeout: Duration) -> (CommandGateway, Arc<FakeTransport>) {
        let config = ConfigSnapshot {
            ack_timeout,
            ..Default::default()
        };
        let transport = Arc::new(FakeTransport::default());
        let gateway = CommandGateway::new(
            Arc::new(ConfigStore::fixed(config)),
            Arc::new(AckRegistry::new()),
            transport.clone(),
        );
        (gateway, transport)
    }

    fn ack(txid: TransactionId, extra: Value) -> AckEnvelope {
        let mut body = json!({"txid": txid.to_string()});
        if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
            body.extend(extra);
        }
        match body {
            Value::Object(body) => AckEnvelope::new(txid, body),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_set_params_round_trip() {
        let (gateway, transport) = gateway_with(Duration::from_secs(15));

        let txid = gateway
            .submit(json!({"cmd": "set_params", "options": {"gain": 2}}))
            .await
            .unwrap();

        let sent = transport.sent.lock()[0].clone();
        assert_eq!(sent.txid(), txid);
        assert_eq!(sent.fields()["cmd"], json!("set_params"));
        assert_eq!(sent.fields()["options"], json!({"gain": 2}));
        assert_eq!(sent.fields()["reply_host"], json!("127.0.0.1"));
        assert_eq!(sent.fields()["reply_port"], json!(40000));

        // Ack arrives before the waiter.
        assert!(gateway
            .registry()
            .resolve(txid, ack(txid, json!({"ok": true, "applied": true}))));

        let result = gateway.await_result(&txid.to_string(), None).await.unwrap();
        assert_eq!(result.body()["applied"], json!(true));
        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ack_delivered_while_waiting() {
        let (gateway, _transport) = gateway_with(Duration::from_secs(15));
        let gateway = Arc::new(gateway);
        let txid = gateway.submit(json!({"cmd": "reprocess"})).await.unwrap();

        let waiter = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.await_result(&txid.to_string(), None).await })
        };
        tokio::task::yield_now().await;
        gateway.registry().resolve(txid, ack(txid, json!({"ok": true})));

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_deadline_times_out() {
        let (gateway, _transport) = gateway_with(Duration::from_millis(100));
        let txid = gateway.submit(json!({"cmd": "reprocess"})).await.unwrap();

        let started = Instant::now();
        let result = gateway.await_result(&txid.to_string(), None).await;

        assert_eq!(result.unwrap_err(), BridgeError::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!gateway.registry().is_pending(&txid));

        // The late ack finds nobody.
        assert!(!gateway.registry().resolve(txid, ack(txid, json!({"ok": true}))));
        assert_eq!(gateway.registry().stats().snapshot().unmatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_timeout_shorter_than_deadline() {
        let (gateway, _transport) = gateway_with(Duration::from_secs(15));
        let txid = gateway.submit(json!({"cmd": "reprocess"})).await.unwrap();

        let started = Instant::now();
        let result = gateway
            .await_result(&txid.to_string(), Some(Duration::from_millis(250)))
            .await;
        assert_eq!(result.unwrap_err(), BridgeError::Timeout);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_caller_timeout_uses_deadline() {
        let (gateway, _transport) = gateway_with(Duration::from_millis(500));
        let txid = gateway.submit(json!({"cmd": "reprocess"})).await.unwrap();

        let result = gateway
            .await_result(&txid.to_string(), Some(Duration::from_millis(u64::MAX)))
            .await;
        assert_eq!(result.unwrap_err(), BridgeError::Timeout);
    }

    #[tokio::test]
    async fn test_unknown_and_claimed_txids() {
        let (gateway, _transport) = gateway_with(Duration::from_secs(15));

        assert!(matches!(
            gateway.await_result("not-a-txid", None).await,
            Err(BridgeError::NoSuchTransaction(_))
        ));
        assert!(matches!(
            gateway
                .await_result(&TransactionId::new().to_string(), None)
                .await,
            Err(BridgeError::NoSuchTransaction(_))
        ));

        let txid = gateway.submit(json!({"cmd": "reprocess"})).await.unwrap();
        gateway.registry().resolve(txid, ack(txid, json!({})));
        assert!(gateway.await_result(&txid.to_string(), None).await.is_ok());
        assert!(matches!(
            gateway.await_result(&txid.to_string(), None).await,
            Err(BridgeError::NoSuchTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_commands_rejected() {
        let (gateway, transport) = gateway_with(Duration::from_secs(15));

        for bad in [json!([1, 2]), json!({"options": {}}), json!({"cmd": 5}), json!("ping")] {
            assert!(matches!(
                gateway.submit(bad).await,
                Err(BridgeError::InvalidCommand(_))
            ));
        }
        assert!(transport.sent.lock().is_empty());
        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_rolls_back_registration() {
        let (gateway, transport) = gateway_with(Duration::from_secs(15));
        transport.fail_sends.store(true, Ordering::SeqCst);

        assert!(matches!(
            gateway.submit(json!({"cmd": "reprocess"})).await,
            Err(BridgeError::Transport(_))
        ));
        assert_eq!(gateway.pending_count(), 0);
        assert_eq!(gateway.parked_count(), 0);
        assert_eq!(gateway.registry().stats().snapshot().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_and_drops_abandoned_handles() {
        let (gateway, _transport) = gateway_with(Duration::from_secs(1));
        let txid = gateway.submit(json!({"cmd": "reprocess"})).await.unwrap();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(gateway.sweep(), 1);
        assert!(!gateway.registry().is_pending(&txid));
        // Still claimable within the grace period.
        assert_eq!(gateway.parked_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        gateway.sweep();
        assert_eq!(gateway.parked_count(), 0);
    }
}
