//! `RelayServer`: Axum HTTP, WebSocket and SSE front end for the relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{Diagnostics, Relay};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::error::ServerError;
use crate::event_stream;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The relay core.
    pub relay: Arc<Relay>,
    /// Effective configuration.
    pub config: Arc<RelayConfig>,
    /// Shutdown coordinator; heartbeat loops hang off its token.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_message_size;
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route(
            "/events",
            get(event_stream::subscribe).post(event_stream::submit),
        )
        .route("/diagnostics", get(diagnostics_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// The relay server, before it is bound.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    relay: Arc<Relay>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server and its relay from configuration.
    pub fn new(config: RelayConfig) -> Self {
        let relay = Relay::new(config.vocabulary(), config.send_queue);
        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the router over this server's state.
    pub fn router(&self) -> Router {
        build_router(AppState {
            relay: Arc::clone(&self.relay),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        })
    }

    /// The relay core.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bind the configured address and start serving.
    pub async fn listen(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let stop = self.shutdown.token().cancelled_owned();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stop)
                .await
            {
                error!(error = %e, "server terminated");
            }
        });

        info!(
            addr = %local_addr,
            supported_events = ?self.relay.vocabulary().kinds(),
            "relay listening"
        );
        Ok(ServerHandle {
            local_addr,
            relay: self.relay,
            shutdown: self.shutdown,
            timeout: self.config.shutdown_timeout(),
            server,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    relay: Arc<Relay>,
    shutdown: Arc<ShutdownCoordinator>,
    timeout: Duration,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The relay core.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Stop accepting, drain every client with a closing notice, and wait
    /// for open connections to finish.
    ///
    /// A request already past the listener when this runs is admitted into
    /// a drained relay and gets only the closing notice.
    ///
    /// Returns the number of clients drained.
    pub async fn shutdown(self, reason: &str) -> usize {
        self.shutdown.shutdown();
        let drained = self.relay.drain(reason);
        let clean = self
            .shutdown
            .graceful_shutdown(vec![self.server], self.timeout)
            .await;
        info!(drained, clean, "relay stopped");
        drained
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.relay.connected_clients(),
    ))
}

/// GET /diagnostics
async fn diagnostics_handler(State(state): State<AppState>) -> Json<Diagnostics> {
    Json(state.relay.diagnostics())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            relay_telemetry::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
