// packages/engine/src/lib.rs
//! Nexus Engine Library
//!
//! Adaptive task routing and a recursive agent orchestration substrate,
//! consumed as a library by a host process.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **routing**: EMA/UCB agent selection, snapshots and persistence
//! - **nexus**: agent registry, spawn policy, spawn controller, drift monitor
//! - **runtime**: agent processes and the tick-driven execution loop
//! - **security**: advisory identity and rate-limit gate
//! - **pruning**: constraint-utility pruning of agent subtrees
//! - **observability**: tracing subscriber and metric names
//! - **utils**: configuration, errors and time helpers

pub mod nexus;
pub mod observability;
pub mod pruning;
pub mod routing;
pub mod runtime;
pub mod security;
pub mod utils;

// Re-export commonly used types
pub use nexus::{AgentFingerprint, AgentRegistry, SpawnController, SpawnPolicy};
pub use routing::{AdaptiveRouter, AgentId, Outcome, RouteTask, RouterSnapshot};
pub use runtime::{AgentConfig, ExecutionRuntime, RuntimeEvent, SpawnRequest};
pub use security::{AccessGate, GateAction};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine build information
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub target_family: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: VERSION,
            target_family: std::env::consts::FAMILY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert_eq!(info.name, "nexus-engine");
        assert_eq!(info.version, VERSION);
    }
}
