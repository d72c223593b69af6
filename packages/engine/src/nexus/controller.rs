// packages/engine/src/nexus/controller.rs
//! Spawn controller: fan-out budgets, guarded spawning and per-agent steps
//!
//! # Spawn sequence
//!
//! ```text
//! safe_spawn(parent, factory)
//!   ├─ SpawnPolicy::next_spawn_ctx   → DepthExceeded
//!   ├─ budget check + increment      → SpawnBudgetExceeded
//!   ├─ factory(ctx)                  → child
//!   └─ registry.has(child.id)        → UnregisteredChild
//! ```
//!
//! Budget counters live in a sharded map; the check and the increment happen
//! under the same shard lock, so concurrent spawns for one parent can never
//! overshoot the limit. A spawn that passes the budget check consumes budget
//! even if the factory later fails.

use crate::nexus::drift::{DriftAssessment, DriftMonitor, DriftSample};
use crate::nexus::registry::AgentRegistry;
use crate::nexus::spawn_policy::{SpawnContext, SpawnPolicy, MAX_CHILDREN_PER_AGENT};
use crate::observability::names;
use crate::runtime::process::AgentProcess;
use crate::utils::config::DriftConfig;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one agent step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub state: Vec<f64>,
    pub drift: bool,
    pub std_dev: f64,
    pub entropy: f64,
}

pub struct SpawnController {
    registry: Arc<AgentRegistry>,
    children_by_parent: DashMap<String, usize>,
    monitors: DashMap<String, DriftMonitor>,
    drift_config: DriftConfig,
}

impl SpawnController {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_drift_config(registry, DriftConfig::default())
    }

    pub fn with_drift_config(registry: Arc<AgentRegistry>, drift_config: DriftConfig) -> Self {
        Self {
            registry,
            children_by_parent: DashMap::new(),
            monitors: DashMap::new(),
            drift_config,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// True while `parent_id` has fan-out budget left
    pub fn can_spawn(&self, parent_id: &str) -> bool {
        self.child_count(parent_id) < MAX_CHILDREN_PER_AGENT
    }

    /// Children spawned so far by `parent_id`
    pub fn child_count(&self, parent_id: &str) -> usize {
        self.children_by_parent
            .get(parent_id)
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Registered children of `parent_id`, in spawn order
    pub fn children(&self, parent_id: &str) -> Vec<String> {
        self.registry.children(parent_id)
    }

    /// Spawn a child of `parent` through `make_child`.
    ///
    /// The factory receives the validated child context and must register
    /// the child in the registry before returning it.
    pub fn safe_spawn<F>(&self, parent: &AgentProcess, make_child: F) -> Result<AgentProcess>
    where
        F: FnOnce(SpawnContext) -> Result<AgentProcess>,
    {
        let ctx = SpawnPolicy::next_spawn_ctx(&parent.spawn_context(), &parent.id).map_err(|e| {
            metrics::counter!(names::SPAWN_REJECTIONS, "reason" => "depth").increment(1);
            warn!("Spawn from {} rejected: {}", parent.id, e);
            e
        })?;

        {
            let mut used = self.children_by_parent.entry(parent.id.clone()).or_insert(0);
            if *used >= MAX_CHILDREN_PER_AGENT {
                metrics::counter!(names::SPAWN_REJECTIONS, "reason" => "budget").increment(1);
                warn!("Spawn budget exhausted for {} ({} children)", parent.id, *used);
                return Err(EngineError::SpawnBudgetExceeded(parent.id.clone()));
            }
            *used += 1;
        }

        let child = make_child(ctx)?;
        if !self.registry.has(&child.id) {
            metrics::counter!(names::SPAWN_REJECTIONS, "reason" => "unregistered").increment(1);
            return Err(EngineError::UnregisteredChild(child.id));
        }

        metrics::counter!(names::SPAWNS).increment(1);
        debug!("Spawned {} under {} at depth {}", child.id, parent.id, child.depth);
        Ok(child)
    }

    /// Run one step of `process` and assess its drift window
    pub async fn step(&self, process: &AgentProcess, tick: u64) -> Result<StepResult> {
        let state = process.run_step(tick).await?;

        let assessment: DriftAssessment = {
            let mut monitor = self
                .monitors
                .entry(process.id.clone())
                .or_insert_with(|| DriftMonitor::with_config(&self.drift_config));
            monitor.push(DriftSample {
                tick,
                state: state.clone(),
            })?;
            monitor.assess()
        };

        if assessment.drift {
            metrics::counter!(names::DRIFT_DETECTED, "agent" => process.id.clone()).increment(1);
            debug!(
                "Drift on {} at tick {}: std_dev={:.3} entropy={:.3}",
                process.id, tick, assessment.std_dev, assessment.entropy
            );
        }

        Ok(StepResult {
            state,
            drift: assessment.drift,
            std_dev: assessment.std_dev,
            entropy: assessment.entropy,
        })
    }

    /// Current assessment for `agent_id`, if it has stepped at least once
    pub fn assessment(&self, agent_id: &str) -> Option<DriftAssessment> {
        self.monitors.get(agent_id).map(|m| m.assess())
    }

    /// Drop the drift window of a retired agent
    pub fn forget(&self, agent_id: &str) {
        self.monitors.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus::registry::{content_hash, AgentFingerprint};
    use crate::runtime::process::{FnBehavior, SyntheticBehavior};

    fn root(registry: &AgentRegistry, id: &str) -> AgentProcess {
        registry
            .register(id, AgentFingerprint::new("Root", "1.0.0", content_hash(&[id])))
            .unwrap();
        AgentProcess::root(id, Arc::new(SyntheticBehavior::new(id, 0, 4)))
    }

    fn registering_factory<'a>(
        registry: &'a AgentRegistry,
        id: &'a str,
    ) -> impl FnOnce(SpawnContext) -> Result<AgentProcess> + 'a {
        move |ctx| {
            let parent = ctx.parent_id.clone().unwrap_or_default();
            registry.register(
                id,
                AgentFingerprint::new("Child", "1.0.0", content_hash(&[id])).with_parent(parent),
            )?;
            let behavior = Arc::new(SyntheticBehavior::new(id, ctx.depth, 4));
            Ok(AgentProcess::new(id, ctx, behavior))
        }
    }

    #[test]
    fn test_fan_out_budget() {
        let registry = Arc::new(AgentRegistry::new());
        let controller = SpawnController::new(Arc::clone(&registry));
        let parent = root(&registry, "p");

        for (i, id) in ["c1", "c2", "c3"].iter().enumerate() {
            assert!(controller.can_spawn("p"));
            let child = controller
                .safe_spawn(&parent, registering_factory(&registry, id))
                .unwrap();
            assert_eq!(child.depth, 1);
            assert_eq!(child.parent_id.as_deref(), Some("p"));
            assert_eq!(controller.child_count("p"), i + 1);
        }

        assert!(!controller.can_spawn("p"));
        let err = controller
            .safe_spawn(&parent, registering_factory(&registry, "c4"))
            .unwrap_err();
        assert!(matches!(err, EngineError::SpawnBudgetExceeded(ref id) if id == "p"));
        assert!(!registry.has("c4"));
        assert_eq!(controller.children("p"), vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn test_unregistered_child_rejected() {
        let registry = Arc::new(AgentRegistry::new());
        let controller = SpawnController::new(Arc::clone(&registry));
        let parent = root(&registry, "p");

        let err = controller
            .safe_spawn(&parent, |ctx| {
                Ok(AgentProcess::new(
                    "ghost",
                    ctx,
                    Arc::new(SyntheticBehavior::new("ghost", 1, 4)),
                ))
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::UnregisteredChild(ref id) if id == "ghost"));
        assert_eq!(controller.child_count("p"), 1);
    }

    #[test]
    fn test_depth_checked_before_budget() {
        let registry = Arc::new(AgentRegistry::new());
        let controller = SpawnController::new(Arc::clone(&registry));
        let deep = AgentProcess::new(
            "deep",
            SpawnContext {
                depth: 5,
                parent_id: Some("up".into()),
                lineage_root: Some("top".into()),
            },
            Arc::new(SyntheticBehavior::new("deep", 5, 4)),
        );

        let err = controller
            .safe_spawn(&deep, registering_factory(&registry, "too-deep"))
            .unwrap_err();
        assert!(matches!(err, EngineError::DepthExceeded { depth: 6, .. }));
        assert_eq!(controller.child_count("deep"), 0);
    }

    #[test]
    fn test_lineage_root_flows_to_grandchildren() {
        let registry = Arc::new(AgentRegistry::new());
        let controller = SpawnController::new(Arc::clone(&registry));
        let parent = root(&registry, "r");

        let child = controller
            .safe_spawn(&parent, registering_factory(&registry, "c"))
            .unwrap();
        let grandchild = controller
            .safe_spawn(&child, registering_factory(&registry, "g"))
            .unwrap();
        assert_eq!(grandchild.depth, 2);
        assert_eq!(grandchild.lineage_root.as_deref(), Some("r"));
        assert_eq!(registry.lineage_root("g").as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_step_feeds_per_agent_monitor() {
        let registry = Arc::new(AgentRegistry::new());
        let controller = SpawnController::new(Arc::clone(&registry));
        let steady = AgentProcess::root("steady", Arc::new(FnBehavior::new(|_| Ok(vec![1.0, 1.0]))));
        let wild = AgentProcess::root(
            "wild",
            Arc::new(FnBehavior::new(|t| {
                let v = if t % 2 == 0 { 50.0 } else { -50.0 };
                Ok(vec![v, v])
            })),
        );

        let mut last_wild = None;
        for t in 0..10 {
            let s = controller.step(&steady, t).await.unwrap();
            assert!(!s.drift);
            assert_eq!(s.std_dev, 0.0);
            last_wild = Some(controller.step(&wild, t).await.unwrap());
        }

        let wild_result = last_wild.unwrap();
        assert!(wild_result.drift);
        assert_eq!(wild_result.state.len(), 2);
        assert!(!controller.assessment("steady").unwrap().drift);

        controller.forget("wild");
        assert!(controller.assessment("wild").is_none());
    }

    #[tokio::test]
    async fn test_step_rejects_dimension_change() {
        let registry = Arc::new(AgentRegistry::new());
        let controller = SpawnController::new(registry);
        let shifty = AgentProcess::root(
            "shifty",
            Arc::new(FnBehavior::new(|t| Ok(vec![0.0; 1 + t as usize]))),
        );

        controller.step(&shifty, 0).await.unwrap();
        let err = controller.step(&shifty, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedState(_)));
    }
}
