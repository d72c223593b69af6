// packages/engine/src/pruning/mod.rs
//! Constraint-based subtree pruning
//!
//! The optimizer only decides which agent ids to drop; the runtime acts on
//! the decision through [`ExecutionRuntime::retire`](crate::runtime::ExecutionRuntime::retire).

pub mod constraint;

pub use constraint::{
    compute_utility, Constraint, ConstraintKind, ConstraintNode, ConstraintOptimizer, PruneStats,
    DEFAULT_MIN_UTILITY,
};
