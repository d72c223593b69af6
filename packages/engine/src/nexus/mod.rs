// packages/engine/src/nexus/mod.rs
//! Recursive agent orchestration substrate
//!
//! - **Registry**: append-only identity arena with lineage links
//! - **Spawn Policy**: depth limit and child context derivation
//! - **Drift Monitor**: windowed dispersion and entropy statistics
//! - **Controller**: fan-out budgets, guarded spawning, per-agent steps
//!
//! # Architecture
//!
//! ```text
//!                 SpawnController
//!        ┌──────────────┼───────────────┐
//!        ▼              ▼               ▼
//!   SpawnPolicy    AgentRegistry   DriftMonitor (per agent)
//!   depth ≤ 5      append-only     window of 50 vectors
//!   fan-out ≤ 3    arena of ids    σ > 2.0 or H > 0.75
//! ```

pub mod controller;
pub mod drift;
pub mod registry;
pub mod spawn_policy;

pub use controller::{SpawnController, StepResult};
pub use drift::{DriftAssessment, DriftMonitor, DriftSample};
pub use registry::{content_hash, AgentFingerprint, AgentIndex, AgentRegistry, RegisteredAgent};
pub use spawn_policy::{SpawnContext, SpawnPolicy, MAX_CHILDREN_PER_AGENT, MAX_RECURSION_DEPTH};
