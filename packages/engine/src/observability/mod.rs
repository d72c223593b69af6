// packages/engine/src/observability/mod.rs
//! Tracing and metrics initialisation
//!
//! Call [`init_tracing`] once at program start. Repeated calls are ignored
//! because the global subscriber can only be installed once per process.

use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Metric names recorded by the engine
pub mod names {
    pub const ROUTER_CHOICES: &str = "nexus_router_choices_total";
    pub const ROUTER_OUTCOMES: &str = "nexus_router_outcomes_total";
    pub const ROUTER_LATENCY_MS: &str = "nexus_router_outcome_latency_ms";
    pub const ROUTER_PAUSED: &str = "nexus_router_paused";
    pub const SPAWNS: &str = "nexus_spawns_total";
    pub const SPAWN_REJECTIONS: &str = "nexus_spawn_rejections_total";
    pub const TICKS: &str = "nexus_runtime_ticks_total";
    pub const TICK_DURATION_MS: &str = "nexus_runtime_tick_duration_ms";
    pub const STEP_ERRORS: &str = "nexus_runtime_step_errors_total";
    pub const ACTIVE_AGENTS: &str = "nexus_runtime_active_agents";
    pub const DRIFT_DETECTED: &str = "nexus_drift_detected_total";
    pub const GATE_DENIALS: &str = "nexus_gate_denials_total";
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; `level` is the fallback filter.
pub fn init_tracing(json: bool, level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Install the Prometheus exporter listening on `addr`
pub fn init_metrics(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| EngineError::Config(format!("Invalid metrics address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Config(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing(false, "debug");
        init_tracing(true, "info");
    }

    #[test]
    fn test_invalid_metrics_addr() {
        assert!(matches!(init_metrics("not-an-addr"), Err(EngineError::Config(_))));
    }
}
