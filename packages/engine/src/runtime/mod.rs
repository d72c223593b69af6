// packages/engine/src/runtime/mod.rs
//! Agent execution runtime
//!
//! - **Process**: an active agent plus its pluggable step behavior
//! - **Execution**: the tick loop, spawn entry point and event delivery
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── ExecutionRuntime ────────────────────────┐
//! │  active: DashMap<id, AgentProcess>                               │
//! │                                                                  │
//! │  every tick_interval:                                            │
//! │    ┌────────┐  ┌────────┐  ┌────────┐                            │
//! │    │ step a │  │ step b │  │ step c │   (concurrent, timed out)  │
//! │    └───┬────┘  └───┬────┘  └───┬────┘                            │
//! │        └───────────┼───────────┘                                 │
//! │                    ▼                                             │
//! │        SpawnController::step ─► DriftMonitor (per agent)         │
//! │                    │                                             │
//! │                    ▼                                             │
//! │          RuntimeEvent callback (serial)                          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod execution;
pub mod process;

pub use execution::{
    AgentConfig, DriftEvent, EventCallback, ExecutionRuntime, RuntimeEvent, RuntimeMetrics,
    SpawnRequest,
};
pub use process::{AgentBehavior, AgentProcess, FnBehavior, SyntheticBehavior};
