//! # relay-telemetry
//!
//! Structured logging and Prometheus metrics for the relay.
//!
//! - `init_telemetry` installs the global `tracing` subscriber (JSON or
//!   human-readable, filtered by `RUST_LOG` or the configured levels)
//! - [`metrics`] holds the metric names and the Prometheus recorder

#![deny(unsafe_code)]

pub mod metrics;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by the `RUST_LOG` env var.
    pub level: String,
    /// Per-module level overrides (e.g. `relay_core` => `debug`).
    pub modules: BTreeMap<String, String>,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Check every configured level parses.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        let _ = parse_level(&self.level)?;
        for level in self.modules.values() {
            let _ = parse_level(level)?;
        }
        Ok(())
    }

    /// Directive string equivalent to this config, e.g. `info,relay_core=debug`.
    pub fn directives(&self) -> Result<String, TelemetryError> {
        let mut directives = parse_level(&self.level)?.to_string().to_lowercase();
        for (module, level) in &self.modules {
            let level = parse_level(level)?.to_string().to_lowercase();
            directives.push_str(&format!(",{module}={level}"));
        }
        Ok(directives)
    }
}

/// Errors raised while setting up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A configured level is not one of `off`, `error`, `warn`, `info`,
    /// `debug`, `trace`.
    #[error("invalid log level `{0}`")]
    InvalidLevel(String),
    /// The assembled filter did not parse.
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

fn parse_level(value: &str) -> Result<LevelFilter, TelemetryError> {
    value
        .parse::<LevelFilter>()
        .map_err(|_| TelemetryError::InvalidLevel(value.to_string()))
}

/// Build the filter used by [`init_telemetry`]. `RUST_LOG` wins when set.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(config.directives()?)?)
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;
    Ok(())
}
