//! Bridge service - HTTP surface over the command gateway.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /send` | submit a command, `202 {ok, txid}` |
//! | `GET /wait-ack?txid=..` | wait for the command's ack |
//! | `GET /config`, `GET /reload` | panel configuration |
//! | `GET /health`, `GET /stats` | liveness and counters |
//!
//! Anything else falls through to `StaticDir` when configured.

use crate::adapters::config::ConfigStore;
use crate::adapters::registry::AckRegistry;
use crate::adapters::transport::DatagramTransport;
use crate::domain::{BridgeError, ConfigSnapshot};
use crate::gateway::CommandGateway;
use crate::middleware::create_cors_layer;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// How often abandoned completions are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Bridge service: owns the registry, transport and gateway.
pub struct BridgeService {
    config: Arc<ConfigStore>,
    transport: DatagramTransport,
    gateway: Arc<CommandGateway>,
}

impl BridgeService {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let registry = Arc::new(AckRegistry::new());
        let transport = DatagramTransport::new(Arc::clone(&config), Arc::clone(&registry));
        let gateway = Arc::new(CommandGateway::new(
            Arc::clone(&config),
            registry,
            Arc::new(transport.clone()),
        ));

        Self {
            config,
            transport,
            gateway,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn transport(&self) -> &DatagramTransport {
        &self.transport
    }

    pub fn gateway(&self) -> &Arc<CommandGateway> {
        &self.gateway
    }

    /// Re-read configuration; the SIGHUP and `/reload` path.
    pub fn reload(&self) -> Arc<ConfigSnapshot> {
        self.config.reload()
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let config = self.config.current();
        let state = AppState {
            config: Arc::clone(&self.config),
            gateway: Arc::clone(&self.gateway),
            transport: self.transport.clone(),
        };

        let router = Router::new()
            .route("/send", post(send_command))
            .route("/wait-ack", get(wait_ack))
            .route("/config", get(get_config))
            .route("/reload", get(reload_config))
            .route("/health", get(health_check))
            .route("/stats", get(stats))
            .with_state(state);

        let router = match &config.static_dir {
            Some(dir) => {
                debug!(dir = %dir.display(), "Serving static files");
                router.fallback_service(ServeDir::new(dir))
            }
            None => router,
        };

        router
            .layer(TraceLayer::new_for_http())
            .layer(create_cors_layer(&config.cors_origins))
    }

    /// Periodically expire overdue completions until `shutdown` flips.
    pub fn spawn_sweeper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        gateway.sweep();
                    }
                }
            }
            debug!("Sweeper stopped");
        })
    }

    /// Serve HTTP on `listener` until `shutdown` resolves, then close the socket.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (sweeper_tx, sweeper_rx) = watch::channel(false);
        let sweeper = self.spawn_sweeper(sweeper_rx);

        info!(addr = %listener.local_addr()?, "MUConnector HTTP listening");
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = sweeper_tx.send(true);
        let _ = sweeper.await;
        self.transport.close().await;
        info!("MUConnector stopped");
        result
    }

    /// Bind the configured HTTP address and serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.current().http_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, shutdown).await
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<ConfigStore>,
    gateway: Arc<CommandGateway>,
    transport: DatagramTransport,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body())).into_response()
    }
}

async fn send_command(State(state): State<AppState>, body: Bytes) -> Response {
    let command: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return BridgeError::InvalidCommand(format!("invalid JSON: {e}")).into_response(),
    };

    match state.gateway.submit(command).await {
        Ok(txid) => (StatusCode::ACCEPTED, Json(json!({ "ok": true, "txid": txid }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Raw strings: values are checked in the handler so errors keep the JSON shape.
#[derive(Debug, Deserialize)]
struct WaitAckQuery {
    txid: Option<String>,
    timeout_ms: Option<String>,
}

async fn wait_ack(
    State(state): State<AppState>,
    query: Result<Query<WaitAckQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            return BridgeError::InvalidCommand(rejection.body_text()).into_response();
        }
    };
    let Some(txid) = query.txid.filter(|t| !t.trim().is_empty()) else {
        return BridgeError::NoSuchTransaction("Missing txid for waiter lookup!".into())
            .into_response();
    };
    let timeout = match query.timeout_ms.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(_) => {
                return BridgeError::InvalidCommand(format!("invalid timeout_ms {raw:?}"))
                    .into_response();
            }
        },
    };

    match state.gateway.await_result(&txid, timeout).await {
        Ok(ack) => Json(json!({
            "ok": true,
            "txid": ack.txid(),
            "ack": ack.into_value(),
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_config(State(state): State<AppState>) -> Response {
    let snapshot = state.config.current();
    Json(snapshot.panel_view()).into_response()
}

async fn reload_config(State(state): State<AppState>) -> Response {
    let snapshot = state.config.reload();
    Json(snapshot.panel_view()).into_response()
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "udpOpen": state.transport.is_open().await,
        "pending": state.gateway.pending_count(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "registry": state.gateway.registry().stats().snapshot(),
        "transport": state.transport.stats().snapshot(),
        "pending": state.gateway.pending_count(),
        "parked": state.gateway.parked_count(),
        "lastPingAgeMs": state.transport.last_ping_age().as_millis() as u64,
    }))
}
