// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Loaded in order: `config/default.toml` (optional), an explicit file
//! (optional), then `NEXUS__*` environment variables. A double underscore
//! separates nested keys, e.g. `NEXUS__RUNTIME__TICK_INTERVAL_MS=250`.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub runtime: RuntimeConfig,
    pub drift: DriftConfig,
    pub gate: GateConfig,
    pub store: StoreConfig,
    pub observability: ObservabilityConfig,
}

/// `[router]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Capacity of the recent-outcomes ring
    pub recent_max: usize,

    /// Autosave period for the snapshot store in seconds (0 disables)
    pub autosave_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            recent_max: 250,
            autosave_interval_secs: 10,
        }
    }
}

/// `[runtime]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tick period in milliseconds
    pub tick_interval_ms: u64,

    /// Dimension of the synthetic state vector
    pub state_dimension: usize,

    /// Per-agent step timeout in milliseconds
    pub step_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            state_dimension: 8,
            step_timeout_ms: 5000,
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// `[drift]` section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Rolling window capacity (samples)
    pub window: usize,

    /// Dispersion threshold
    pub std_dev_threshold: f64,

    /// Normalized entropy threshold (0..1)
    pub entropy_threshold: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window: 50,
            std_dev_threshold: 2.0,
            entropy_threshold: 0.75,
        }
    }
}

/// `[gate]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// When false every check passes
    pub enabled: bool,

    /// Requesters at or beyond this lineage depth may not clone
    pub max_clone_depth: u32,

    pub max_observations_per_minute: usize,

    pub max_proposals_per_hour: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_clone_depth: 3,
            max_observations_per_minute: 100,
            max_proposals_per_hour: 10,
        }
    }
}

/// Snapshot store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    File,
}

/// `[store]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Snapshot file (file backend only)
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("data/router-snapshot.json"),
        }
    }
}

/// `[observability]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default level when `RUST_LOG` is unset
    pub log_level: String,

    pub json_logs: bool,

    /// Prometheus listener, e.g. `0.0.0.0:9000`
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load from the default locations and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load, layering an explicit file over the defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        for name in ["config/default", "packages/engine/config/default"] {
            if Path::new(&format!("{}.toml", name)).exists() {
                builder = builder.add_source(config::File::with_name(name).required(false));
                break;
            }
        }

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("NEXUS")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.router.recent_max == 0 {
            return Err(EngineError::Config("router.recent_max must be > 0".into()));
        }
        if self.runtime.tick_interval_ms == 0 {
            return Err(EngineError::Config("runtime.tick_interval_ms must be > 0".into()));
        }
        if self.runtime.state_dimension == 0 {
            return Err(EngineError::Config("runtime.state_dimension must be > 0".into()));
        }
        if self.runtime.step_timeout_ms == 0 {
            return Err(EngineError::Config("runtime.step_timeout_ms must be > 0".into()));
        }
        if self.drift.window == 0 {
            return Err(EngineError::Config("drift.window must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.drift.entropy_threshold) {
            return Err(EngineError::Config(
                "drift.entropy_threshold must be within 0..1".into(),
            ));
        }
        if self.store.backend == StoreBackend::File && self.store.path.as_os_str().is_empty() {
            return Err(EngineError::Config("store.path is required for the file backend".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.router.recent_max, 250);
        assert_eq!(config.runtime.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.drift.window, 50);
        assert_eq!(config.drift.std_dev_threshold, 2.0);
        assert_eq!(config.gate.max_proposals_per_hour, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.runtime.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.drift.entropy_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.store.backend = StoreBackend::File;
        config.store.path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[runtime]\ntick_interval_ms = 250\n\n[store]\nbackend = \"file\"\npath = \"snap.json\""
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.runtime.tick_interval_ms, 250);
        assert_eq!(config.runtime.state_dimension, 8);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("snap.json"));
    }
}
