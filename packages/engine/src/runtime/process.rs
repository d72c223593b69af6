// packages/engine/src/runtime/process.rs
//! Agent processes and pluggable step behaviors
//!
//! The core never looks inside an agent: each process carries an
//! [`AgentBehavior`] that turns a tick counter into a state vector. A
//! behavior must keep the vector dimensionality fixed for the lifetime of
//! its agent.

use crate::nexus::spawn_policy::SpawnContext;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Step function of an agent
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Produce the agent's state vector for `tick`
    async fn step(&self, tick: u64) -> Result<Vec<f64>>;

    /// Short label used in logs
    fn kind(&self) -> &str {
        "custom"
    }
}

/// Deterministic pseudo-state derived from identity, depth and tick.
///
/// Each dimension mixes three sine waves whose phase is seeded by a hash of
/// the agent id; deeper agents oscillate with a larger amplitude.
#[derive(Debug, Clone)]
pub struct SyntheticBehavior {
    seeds: Vec<f64>,
    amplitude: f64,
}

impl SyntheticBehavior {
    pub fn new(agent_id: &str, depth: u32, dimension: usize) -> Self {
        let seeds = (0..dimension)
            .map(|i| identity_seed(&format!("{}{}", agent_id, i)))
            .collect();
        Self {
            seeds,
            amplitude: 1.0 + depth as f64 * 0.2,
        }
    }

    pub fn dimension(&self) -> usize {
        self.seeds.len()
    }

    fn state_at(&self, tick: u64) -> Vec<f64> {
        self.seeds
            .iter()
            .map(|seed| {
                let phase = seed + tick as f64 * 0.1;
                self.amplitude * phase.sin() + 0.5 * (phase * 2.0).cos() + 0.25 * (phase * 0.5).sin()
            })
            .collect()
    }
}

#[async_trait]
impl AgentBehavior for SyntheticBehavior {
    async fn step(&self, tick: u64) -> Result<Vec<f64>> {
        Ok(self.state_at(tick))
    }

    fn kind(&self) -> &str {
        "synthetic"
    }
}

/// 32-bit rolling string hash scaled into a small phase offset
fn identity_seed(s: &str) -> f64 {
    let hash = s
        .chars()
        .fold(0i32, |h, c| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32));
    (hash as i64).abs() as f64 / 1_000_000.0
}

/// Behavior backed by a synchronous closure
pub struct FnBehavior<F> {
    f: F,
}

impl<F> FnBehavior<F>
where
    F: Fn(u64) -> Result<Vec<f64>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> AgentBehavior for FnBehavior<F>
where
    F: Fn(u64) -> Result<Vec<f64>> + Send + Sync,
{
    async fn step(&self, tick: u64) -> Result<Vec<f64>> {
        (self.f)(tick)
    }

    fn kind(&self) -> &str {
        "fn"
    }
}

/// A registered agent as driven by the tick loop
#[derive(Clone)]
pub struct AgentProcess {
    pub id: String,
    pub depth: u32,
    pub parent_id: Option<String>,
    pub lineage_root: Option<String>,
    behavior: Arc<dyn AgentBehavior>,
}

impl AgentProcess {
    pub fn new(id: impl Into<String>, ctx: SpawnContext, behavior: Arc<dyn AgentBehavior>) -> Self {
        Self {
            id: id.into(),
            depth: ctx.depth,
            parent_id: ctx.parent_id,
            lineage_root: ctx.lineage_root,
            behavior,
        }
    }

    /// Top-level process at depth 0
    pub fn root(id: impl Into<String>, behavior: Arc<dyn AgentBehavior>) -> Self {
        Self::new(id, SpawnContext::root(), behavior)
    }

    pub fn spawn_context(&self) -> SpawnContext {
        SpawnContext {
            depth: self.depth,
            parent_id: self.parent_id.clone(),
            lineage_root: self.lineage_root.clone(),
        }
    }

    pub async fn run_step(&self, tick: u64) -> Result<Vec<f64>> {
        self.behavior.step(tick).await
    }

    pub fn behavior_kind(&self) -> &str {
        self.behavior.kind()
    }
}

impl fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentProcess")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("parent_id", &self.parent_id)
            .field("lineage_root", &self.lineage_root)
            .field("behavior", &self.behavior.kind())
            .finish()
    }
}
