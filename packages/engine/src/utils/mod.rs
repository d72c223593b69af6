// packages/engine/src/utils/mod.rs
//! Common utilities: configuration, errors and time helpers

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
