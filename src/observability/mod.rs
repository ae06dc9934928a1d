// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - `init_tracing`: `tracing-subscriber` with `RUST_LOG`-style filtering;
//!   JSON lines when `POLYHOST_LOG_FORMAT=json`
//! - `init_metrics`: Prometheus recorder for the `metrics` facade; the
//!   rendered exposition is available through [`render_metrics`]

use crate::utils::errors::{HostError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

const DEFAULT_FILTER: &str = "info,polyglot_host=debug";

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("POLYHOST_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| HostError::InvalidState(format!("tracing already initialized: {}", e)))
}

/// Install the Prometheus metrics recorder (idempotent)
pub fn init_metrics() -> Result<()> {
    PROMETHEUS
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| HostError::InvalidState(format!("failed to install metrics recorder: {}", e)))
        })
        .map(|_| ())
}

/// Current metrics in Prometheus text format, if the recorder is installed
pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(|handle| handle.render())
}
