// packages/engine/src/routing/mod.rs
//! Adaptive task routing
//!
//! - **Router**: EMA statistics, UCB-style selection, pause/resume, overrides
//! - **Types**: agent enumeration, tasks, outcomes, snapshots
//! - **Store**: snapshot persistence, diffing and autosave
//!
//! # Control flow
//!
//! ```text
//! task ──► choose() ──► agent runs (host) ──► record_outcome()
//!              ▲                                   │
//!              └──────── EMA stats / version ◄─────┘
//!                               │
//!                         snapshot() ──► SnapshotStore
//! ```

pub mod router;
pub mod store;
pub mod types;

pub use router::{compute_delta, expected_utility, AdaptiveRouter};
pub use store::{
    spawn_autosave, store_from_config, FileSnapshotStore, MemorySnapshotStore, SnapshotDiff,
    SnapshotStore,
};
pub use types::{
    AgentId, AgentStats, Outcome, RouteTask, RouterSnapshot, RouterStatus, RouterWeight,
    StatsOverride,
};
