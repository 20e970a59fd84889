//! # relay-server
//!
//! Axum front end for the notification relay.
//!
//! - `GET /ws`: WebSocket transport; text frames are submissions
//! - `GET /events`: server-sent-events stream; `POST /events` submits
//! - `GET /diagnostics`, `GET /health`, `GET /metrics`
//! - Layered configuration via `figment`
//! - Graceful shutdown: drain with closing notices, then stop accepting

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod event_stream;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ConfigError, HeartbeatConfig, Overrides, RelayConfig};
pub use error::ServerError;
pub use server::{build_router, AppState, RelayServer, ServerHandle};
pub use shutdown::{shutdown_signal, ShutdownCoordinator};
