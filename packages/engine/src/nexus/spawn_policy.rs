// packages/engine/src/nexus/spawn_policy.rs
//! Recursion limits and spawn context derivation
//!
//! Computing a child's context always validates its depth, so no caller can
//! derive a context that skips the limit check.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Deepest allowed spawn depth (roots are depth 0)
pub const MAX_RECURSION_DEPTH: u32 = 5;

/// Direct children a single agent may spawn
pub const MAX_CHILDREN_PER_AGENT: usize = 3;

/// Where an agent sits in its lineage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnContext {
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_root: Option<String>,
}

impl SpawnContext {
    /// Context of a top-level agent
    pub fn root() -> Self {
        Self::default()
    }
}

pub struct SpawnPolicy;

impl SpawnPolicy {
    pub fn validate_depth(depth: u32) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(EngineError::DepthExceeded {
                depth,
                max: MAX_RECURSION_DEPTH,
            });
        }
        Ok(())
    }

    /// Context for a child of `parent_id`; the lineage root is inherited, or
    /// becomes `parent_id` when the parent is itself a root.
    pub fn next_spawn_ctx(prev: &SpawnContext, parent_id: &str) -> Result<SpawnContext> {
        let next = SpawnContext {
            depth: prev.depth.saturating_add(1),
            parent_id: Some(parent_id.to_string()),
            lineage_root: Some(
                prev.lineage_root
                    .clone()
                    .unwrap_or_else(|| parent_id.to_string()),
            ),
        };
        Self::validate_depth(next.depth)?;
        Ok(next)
    }
}
