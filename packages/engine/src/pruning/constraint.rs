// packages/engine/src/pruning/constraint.rs
//! Utility-driven pruning of the agent hierarchy
//!
//! Each node carries weighted constraints. A node's utility is the
//! priority-weighted mean of what its constraints realize:
//!
//! ```text
//! satisfaction_i = 1                                   if satisfied
//!                = clamp(1 - |current - threshold| / threshold, 0, 1)
//! utility        = Σ priority_i · utility_i · satisfaction_i / Σ priority_i
//! ```
//!
//! A node below the minimum utility is pruned when it has a critical
//! violation (priority > 0.8 and unsatisfied) or sits deeper than 3.
//! Pruning takes the whole subtree.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Default utility floor for [`ConstraintOptimizer::optimize_tree`]
pub const DEFAULT_MIN_UTILITY: f64 = 0.3;

/// Constraints above this priority are critical
const CRITICAL_PRIORITY: f64 = 0.8;

/// Low-utility nodes deeper than this are pruned even without a critical violation
const PRUNE_DEPTH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Depth,
    Resource,
    Time,
    Quality,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    /// Importance in 0..=1
    pub priority: f64,
    pub threshold: f64,
    pub current_value: f64,
    pub satisfied: bool,
    /// Benefit of satisfying this constraint, 0..=1
    pub utility: f64,
}

impl Constraint {
    pub fn new(id: impl Into<String>, kind: ConstraintKind, priority: f64, utility: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            priority,
            threshold: 0.0,
            current_value: 0.0,
            satisfied: true,
            utility,
        }
    }

    /// Mark unsatisfied with the measured value against its threshold
    pub fn violated(mut self, current_value: f64, threshold: f64) -> Self {
        self.satisfied = false;
        self.current_value = current_value;
        self.threshold = threshold;
        self
    }

    fn satisfaction(&self) -> f64 {
        if self.satisfied {
            return 1.0;
        }
        if self.threshold == 0.0 || !self.threshold.is_finite() || !self.current_value.is_finite() {
            return 0.0;
        }
        (1.0 - (self.current_value - self.threshold).abs() / self.threshold.abs()).clamp(0.0, 1.0)
    }

    fn is_critical_violation(&self) -> bool {
        self.priority > CRITICAL_PRIORITY && !self.satisfied
    }
}

/// Priority-weighted mean of realized constraint utility; 0 for no constraints
pub fn compute_utility(constraints: &[Constraint]) -> f64 {
    let (total_utility, total_weight) = constraints.iter().fold((0.0, 0.0), |(u, w), c| {
        let weight = c.priority.clamp(0.0, 1.0);
        let realized = c.utility.clamp(0.0, 1.0) * c.satisfaction();
        (u + realized * weight, w + weight)
    });

    if total_weight > 0.0 {
        total_utility / total_weight
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintNode {
    pub agent_id: String,
    pub depth: u32,
    pub constraints: Vec<Constraint>,
    pub children: Vec<String>,
    pub utility_score: f64,
    pub pruned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneStats {
    pub total: usize,
    pub active: usize,
    pub pruned: usize,
    pub avg_utility: f64,
}

/// Constraint tree over agent ids, iterated in registration order
#[derive(Debug, Default)]
pub struct ConstraintOptimizer {
    nodes: Vec<ConstraintNode>,
    index: HashMap<String, usize>,
    queue: Vec<Constraint>,
}

impl ConstraintOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-score `agent_id`.
    ///
    /// Re-registering replaces depth and constraints, keeps known children
    /// and clears the pruned flag.
    pub fn register_node(&mut self, agent_id: impl Into<String>, depth: u32, constraints: Vec<Constraint>) {
        let agent_id = agent_id.into();
        let utility_score = compute_utility(&constraints);
        debug!("Registered constraint node {} with utility {:.3}", agent_id, utility_score);

        match self.index.get(&agent_id) {
            Some(&i) => {
                let node = &mut self.nodes[i];
                node.depth = depth;
                node.constraints = constraints;
                node.utility_score = utility_score;
                node.pruned = false;
            }
            None => {
                self.index.insert(agent_id.clone(), self.nodes.len());
                self.nodes.push(ConstraintNode {
                    agent_id,
                    depth,
                    constraints,
                    children: Vec::new(),
                    utility_score,
                    pruned: false,
                });
            }
        }
    }

    /// Link `child_id` under `parent_id`; false when the parent is unknown
    pub fn add_child(&mut self, parent_id: &str, child_id: impl Into<String>) -> bool {
        match self.index.get(parent_id) {
            Some(&i) => {
                let child_id = child_id.into();
                let children = &mut self.nodes[i].children;
                if !children.contains(&child_id) {
                    children.push(child_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn node(&self, agent_id: &str) -> Option<&ConstraintNode> {
        self.index.get(agent_id).map(|&i| &self.nodes[i])
    }

    pub fn should_prune(&self, agent_id: &str, min_utility: f64) -> bool {
        let Some(node) = self.node(agent_id) else {
            return false;
        };
        if node.utility_score >= min_utility {
            return false;
        }

        if node.constraints.iter().any(Constraint::is_critical_violation) {
            warn!("Pruning {}: critical constraint violation", agent_id);
            return true;
        }
        if node.depth > PRUNE_DEPTH {
            warn!("Pruning {}: utility {:.3} at depth {}", agent_id, node.utility_score, node.depth);
            return true;
        }
        false
    }

    /// Mark `agent_id` and its registered subtree pruned; returns the ids, root first
    pub fn prune_node(&mut self, agent_id: &str) -> Vec<String> {
        let mut pruned = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![agent_id.to_string()];

        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(&i) = self.index.get(&id) else {
                continue;
            };
            let node = &mut self.nodes[i];
            node.pruned = true;
            stack.extend(node.children.iter().rev().cloned());
            pruned.push(id);
        }

        if !pruned.is_empty() {
            info!("Pruned {} nodes starting from {}", pruned.len(), agent_id);
        }
        pruned
    }

    /// Prune every live node that fails [`should_prune`](Self::should_prune)
    pub fn optimize_tree(&mut self, min_utility: f64) -> Vec<String> {
        let mut pruned = Vec::new();
        for i in 0..self.nodes.len() {
            if self.nodes[i].pruned {
                continue;
            }
            let id = self.nodes[i].agent_id.clone();
            if self.should_prune(&id, min_utility) {
                pruned.extend(self.prune_node(&id));
            }
        }
        pruned
    }

    /// Utility of `agent_id`, 0 when unknown
    pub fn utility(&self, agent_id: &str) -> f64 {
        self.node(agent_id).map(|n| n.utility_score).unwrap_or(0.0)
    }

    pub fn queue_constraint(&mut self, constraint: Constraint) {
        self.queue.push(constraint);
    }

    pub fn constraint_queue(&self) -> &[Constraint] {
        &self.queue
    }

    pub fn stats(&self) -> PruneStats {
        let total = self.nodes.len();
        let pruned = self.nodes.iter().filter(|n| n.pruned).count();
        let avg_utility = if total > 0 {
            self.nodes.iter().map(|n| n.utility_score).sum::<f64>() / total as f64
        } else {
            0.0
        };
        PruneStats {
            total,
            active: total - pruned,
            pruned,
            avg_utility,
        }
    }
}
