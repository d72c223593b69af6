// packages/engine/src/utils/errors.rs
//! Engine error types
//!
//! Every fallible operation in the engine returns [`EngineError`]. Validation
//! errors (duplicate registration, depth and fan-out limits, malformed state
//! vectors) are raised on the calling stack; step failures are caught inside
//! the tick loop and reported through the runtime's event channel instead.

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// An agent id was registered twice
    #[error("Agent {0} already registered")]
    DuplicateAgent(String),

    /// Lookup of an agent id that was never registered
    #[error("Unknown agent {0}")]
    UnknownAgent(String),

    /// Spawn would exceed the recursion depth limit
    #[error("Recursion depth {depth} exceeds safe limit {max}")]
    DepthExceeded { depth: u32, max: u32 },

    /// Parent has no fan-out budget left
    #[error("Spawn budget exceeded for {0}")]
    SpawnBudgetExceeded(String),

    /// Spawn factory returned a child that is not in the registry
    #[error("Unregistered child agent {0}")]
    UnregisteredChild(String),

    /// State vector rejected by the drift monitor
    #[error("Malformed state vector: {0}")]
    MalformedState(String),

    /// Agent step function failed
    #[error("Step failed for agent {agent_id}: {reason}")]
    StepFailed { agent_id: String, reason: String },

    /// Agent step function did not finish within the step timeout
    #[error("Step timed out for agent {0}")]
    StepTimeout(String),

    /// Request rejected before reaching a component
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Snapshot store failure
    #[error("Storage failed: {0}")]
    StorageFailed(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl EngineError {
    /// Validation errors are local and synchronous; the caller must see them
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateAgent(_)
                | EngineError::DepthExceeded { .. }
                | EngineError::SpawnBudgetExceeded(_)
                | EngineError::MalformedState(_)
                | EngineError::UnregisteredChild(_)
        )
    }
}
