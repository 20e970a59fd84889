//! Relay configuration.
//!
//! Sources, lowest priority first:
//! 1. compiled [`RelayConfig::default()`]
//! 2. an optional JSON file
//! 3. `RELAY_*` environment variables, nested keys split on `__`
//!    (`RELAY_HEARTBEAT__INTERVAL_SECS=5`)
//! 4. command-line [`Overrides`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use relay_core::{EventVocabulary, DEFAULT_EVENT_KINDS, DEFAULT_SEND_QUEUE};
use relay_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Largest accepted per-endpoint queue depth.
pub const MAX_SEND_QUEUE: usize = 65_536;
/// Largest accepted heartbeat interval.
pub const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 3_600;
/// Largest accepted inbound message, in bytes.
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// A source could not be read or did not match the schema.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}

/// Per-transport heartbeat settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeats.
    pub interval_secs: u64,
    /// Send heartbeats on WebSocket connections.
    pub websocket: bool,
    /// Send heartbeats on server-sent-event streams.
    pub event_stream: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            websocket: false,
            event_stream: true,
        }
    }
}

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8787`, `0` to auto-assign).
    pub port: u16,
    /// Event kinds that may be broadcast, in the order clients see them.
    pub supported_events: Vec<String>,
    /// Frames each client may have queued before it counts as failed.
    pub send_queue: usize,
    /// Max WebSocket message and HTTP body size in bytes.
    pub max_message_size: usize,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// How long shutdown waits for connections to finish.
    pub shutdown_timeout_secs: u64,
    /// Logging.
    pub log: TelemetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            supported_events: DEFAULT_EVENT_KINDS.iter().map(ToString::to_string).collect(),
            send_queue: DEFAULT_SEND_QUEUE,
            max_message_size: 64 * 1024,
            heartbeat: HeartbeatConfig::default(),
            shutdown_timeout_secs: 10,
            log: TelemetryConfig::default(),
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Host to bind.
    pub host: Option<String>,
    /// Port to bind.
    pub port: Option<u16>,
    /// Default log level.
    pub log_level: Option<String>,
    /// JSON log output.
    pub log_json: Option<bool>,
    /// WebSocket heartbeats.
    pub heartbeat_websocket: Option<bool>,
    /// Heartbeat interval.
    pub heartbeat_interval_secs: Option<u64>,
}

impl Overrides {
    fn merge_into(&self, mut figment: Figment) -> Figment {
        if let Some(host) = &self.host {
            figment = figment.merge(Serialized::default("host", host));
        }
        if let Some(port) = self.port {
            figment = figment.merge(Serialized::default("port", port));
        }
        if let Some(level) = &self.log_level {
            figment = figment.merge(Serialized::default("log.level", level));
        }
        if let Some(json) = self.log_json {
            figment = figment.merge(Serialized::default("log.json", json));
        }
        if let Some(websocket) = self.heartbeat_websocket {
            figment = figment.merge(Serialized::default("heartbeat.websocket", websocket));
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            figment = figment.merge(Serialized::default("heartbeat.interval_secs", secs));
        }
        figment
    }
}

impl RelayConfig {
    /// The layered figment for the given file and overrides.
    pub fn figment(path: Option<&Path>, overrides: &Overrides) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }
        figment = figment.merge(Env::prefixed("RELAY_").split("__").ignore(&["config"]));
        overrides.merge_into(figment)
    }

    /// Load and validate configuration.
    ///
    /// `path` must exist when given.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            debug!(path = %path.display(), "loading config file");
        }
        let config: Self = Self::figment(path, overrides)
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if !(1..=MAX_SEND_QUEUE).contains(&self.send_queue) {
            return Err(invalid(format!(
                "send_queue must be between 1 and {MAX_SEND_QUEUE}, got {}",
                self.send_queue
            )));
        }
        if !(1..=MAX_MESSAGE_SIZE_LIMIT).contains(&self.max_message_size) {
            return Err(invalid(format!(
                "max_message_size must be between 1 and {MAX_MESSAGE_SIZE_LIMIT}, got {}",
                self.max_message_size
            )));
        }
        if !(1..=MAX_HEARTBEAT_INTERVAL_SECS).contains(&self.heartbeat.interval_secs) {
            return Err(invalid(format!(
                "heartbeat.interval_secs must be between 1 and {MAX_HEARTBEAT_INTERVAL_SECS}, got {}",
                self.heartbeat.interval_secs
            )));
        }
        if let Some(kind) = self.supported_events.iter().find(|k| k.trim().is_empty()) {
            return Err(invalid(format!(
                "supported_events must not contain blank kinds, got {kind:?}"
            )));
        }
        self.log
            .validate()
            .map_err(|e| invalid(format!("log: {e}")))?;
        Ok(())
    }

    /// The configured vocabulary, duplicates dropped.
    pub fn vocabulary(&self) -> EventVocabulary {
        EventVocabulary::from_kinds(self.supported_events.iter().cloned())
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(message.into())
}
