//! UDP transport to the controller.
//!
//! The socket is opened lazily on the first send and closed again when the
//! controller stops answering liveness probes.
//!
//! ```text
//!            send / ensure_open                 staleness or close()
//!   Closed ─────────────────────────▶ Open ─────────────────────────▶ Closed
//!                                      │
//!                                      ├─ receive task: ping / ack / drop
//!                                      └─ probe task: {cmd:"ping"} every interval
//! ```
//!
//! Each open session carries a generation number. The probe task of an old
//! session can only close its own generation, never a newer socket.

use crate::adapters::config::ConfigStore;
use crate::adapters::registry::AckRegistry;
use crate::domain::envelope::ping_datagram;
use crate::domain::{AckEnvelope, BridgeError, BridgeResult, CommandEnvelope, InboundDatagram, TransactionId};
use crate::ports::CommandTransport;
use async_trait::async_trait;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Largest payload a UDP datagram can carry over IPv4
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Transport counters
#[derive(Debug, Default)]
pub struct TransportStats {
    pub datagrams_sent: AtomicU64,
    pub datagrams_received: AtomicU64,
    pub pings_received: AtomicU64,
    pub pings_sent: AtomicU64,
    pub malformed: AtomicU64,
    pub unrecognized: AtomicU64,
    pub probe_errors: AtomicU64,
    pub send_errors: AtomicU64,
    pub opens: AtomicU64,
    pub closes: AtomicU64,
}

impl TransportStats {
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            pings_received: self.pings_received.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            probe_errors: self.probe_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatsSnapshot {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub pings_received: u64,
    pub pings_sent: u64,
    pub malformed: u64,
    pub unrecognized: u64,
    pub probe_errors: u64,
    pub send_errors: u64,
    pub opens: u64,
    pub closes: u64,
}

/// One Open period of the socket
struct Session {
    generation: u64,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

struct TransportInner {
    config: Arc<ConfigStore>,
    registry: Arc<AckRegistry>,
    session: Mutex<Option<Session>>,
    /// Last liveness signal from the controller
    last_ping: parking_lot::Mutex<Instant>,
    next_generation: AtomicU64,
    stats: TransportStats,
}

/// UDP socket owner: lifecycle, receive loop and liveness probing.
#[derive(Clone)]
pub struct DatagramTransport {
    inner: Arc<TransportInner>,
}

impl DatagramTransport {
    pub fn new(config: Arc<ConfigStore>, registry: Arc<AckRegistry>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                config,
                registry,
                session: Mutex::new(None),
                last_ping: parking_lot::Mutex::new(Instant::now()),
                next_generation: AtomicU64::new(1),
                stats: TransportStats::default(),
            }),
        }
    }

    /// Open the socket if closed; returns the bound local address.
    pub async fn ensure_open(&self) -> BridgeResult<SocketAddr> {
        let mut session = self.inner.session.lock().await;
        if let Some(open) = session.as_ref() {
            return Ok(open.local_addr);
        }

        let config = self.inner.config.current();
        let bind_addr = config.udp_bind_addr();
        let socket = UdpSocket::bind(&bind_addr).await.map_err(|e| {
            error!(addr = %bind_addr, error = %e, "Failed to bind UDP socket");
            BridgeError::Transport(format!("failed to bind {bind_addr}: {e}"))
        })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown, shutdown_rx) = watch::channel(false);
        *self.inner.last_ping.lock() = Instant::now();

        tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::downgrade(&self.inner),
            shutdown_rx.clone(),
        ));
        tokio::spawn(probe_loop(
            Arc::clone(&socket),
            Arc::downgrade(&self.inner),
            generation,
            config.probe_interval,
            config.staleness_threshold,
            shutdown_rx,
        ));

        *session = Some(Session {
            generation,
            socket,
            local_addr,
            shutdown,
        });
        self.inner.stats.opens.fetch_add(1, Ordering::Relaxed);
        info!(addr = %local_addr, generation, "UDP socket open");
        Ok(local_addr)
    }

    /// Serialise and transmit a command, opening the socket if needed.
    pub async fn send(&self, envelope: &CommandEnvelope) -> BridgeResult<()> {
        let bytes = envelope.to_bytes()?;
        self.ensure_open().await?;

        let socket = {
            let session = self.inner.session.lock().await;
            match session.as_ref() {
                Some(open) => Arc::clone(&open.socket),
                None => return Err(BridgeError::Transport("UDP socket closed".into())),
            }
        };

        let target = self.inner.config.current().controller_addr();
        match socket.send_to(&bytes, &target).await {
            Ok(_) => {
                self.inner.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    txid = %envelope.txid(),
                    cmd = envelope.cmd().unwrap_or_default(),
                    target = %target,
                    "Command sent"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                error!(txid = %envelope.txid(), target = %target, error = %e, "UDP send error");
                Err(BridgeError::Transport(format!("send to {target} failed: {e}")))
            }
        }
    }

    /// Close the socket and stop its tasks. No-op when already closed.
    pub async fn close(&self) {
        self.inner.close_session(None).await;
    }

    pub async fn is_open(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|open| open.local_addr)
    }

    /// Time since the last liveness signal
    pub fn last_ping_age(&self) -> Duration {
        self.inner.last_ping.lock().elapsed()
    }

    pub fn stats(&self) -> &TransportStats {
        &self.inner.stats
    }
}

#[async_trait]
impl CommandTransport for DatagramTransport {
    async fn ensure_open(&self) -> BridgeResult<SocketAddr> {
        DatagramTransport::ensure_open(self).await
    }

    async fn send(&self, envelope: &CommandEnvelope) -> BridgeResult<()> {
        DatagramTransport::send(self, envelope).await
    }
}

impl TransportInner {
    /// Close the current session; with `only`, only if it is that generation.
    async fn close_session(&self, only: Option<u64>) -> bool {
        let mut session = self.session.lock().await;
        let matches = match (session.as_ref(), only) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(open), Some(generation)) => open.generation == generation,
        };
        if !matches {
            return false;
        }

        if let Some(closed) = session.take() {
            let _ = closed.shutdown.send(true);
            self.stats.closes.fetch_add(1, Ordering::Relaxed);
            info!(addr = %closed.local_addr, generation = closed.generation, "UDP closed");
        }
        true
    }

    /// Classify one inbound datagram and route it.
    fn dispatch(&self, bytes: &[u8], from: SocketAddr) {
        self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);

        match InboundDatagram::parse(bytes) {
            Ok(InboundDatagram::Ping) => {
                *self.last_ping.lock() = Instant::now();
                self.stats.pings_received.fetch_add(1, Ordering::Relaxed);
                debug!(from = %from, "Ping received");
            }
            Ok(InboundDatagram::Ack { txid, body }) => match TransactionId::parse(&txid) {
                Ok(id) => {
                    self.registry.resolve(id, AckEnvelope::new(id, body));
                }
                Err(_) => self.registry.record_unmatched(&txid),
            },
            Ok(InboundDatagram::Unrecognized(body)) => {
                self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                debug!(from = %from, fields = body.len(), "Datagram without txid, dropping");
            }
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(from = %from, error = %e, "Bad UDP packet");
            }
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    inner: Weak<TransportInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.dispatch(&buf[..len], from);
                }
                Err(e) => warn!(error = %e, "UDP receive error"),
            },
        }
    }
    debug!("Receive loop stopped");
}

async fn probe_loop(
    socket: Arc<UdpSocket>,
    inner: Weak<TransportInner>,
    generation: u64,
    interval: Duration,
    staleness: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };

                let target = inner.config.current().controller_addr();
                match socket.send_to(&ping_datagram(), &target).await {
                    Ok(_) => {
                        inner.stats.pings_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        inner.stats.probe_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(target = %target, error = %e, "Ping send error");
                    }
                }

                let silent_for = inner.last_ping.lock().elapsed();
                if silent_for > staleness {
                    info!(
                        silent_ms = silent_for.as_millis() as u64,
                        "No ping from controller, closing UDP"
                    );
                    inner.close_session(Some(generation)).await;
                    break;
                }
            }
        }
    }
    debug!(generation, "Probe loop stopped");
}
