// packages/engine/src/routing/types.rs
//! Router data model: agent identifiers, tasks, outcomes and statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::errors::EngineError;

/// The fixed set of routable agents, in enumeration order.
///
/// Enumeration order matters: selection ties go to the earlier agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentId {
    EchoArchivist,
    Fractalwright,
    Mathwright,
    Simwright,
}

impl AgentId {
    pub const ALL: [AgentId; 4] = [
        AgentId::EchoArchivist,
        AgentId::Fractalwright,
        AgentId::Mathwright,
        AgentId::Simwright,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::EchoArchivist => "EchoArchivist",
            AgentId::Fractalwright => "Fractalwright",
            AgentId::Mathwright => "Mathwright",
            AgentId::Simwright => "Simwright",
        }
    }

    /// Short key used by the legacy weights view
    pub fn short_key(&self) -> &'static str {
        match self {
            AgentId::EchoArchivist => "echo",
            AgentId::Fractalwright => "fractal",
            AgentId::Mathwright => "math",
            AgentId::Simwright => "sim",
        }
    }

    pub fn from_short_key(key: &str) -> Option<Self> {
        AgentId::ALL.into_iter().find(|a| a.short_key() == key)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentId::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .or_else(|| AgentId::from_short_key(s))
            .ok_or_else(|| EngineError::UnknownAgent(s.to_string()))
    }
}

/// Inbound task to be routed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTask {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<u64>,
    /// 0..1 difficulty hint, 0.5 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl RouteTask {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: f64) -> Self {
        self.difficulty = Some(difficulty);
        self
    }
}

/// Outcome report for a routed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub task_id: String,
    pub agent: AgentId,
    pub success: bool,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Epoch milliseconds
    pub at: i64,
}

/// Online statistics for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub agent: AgentId,
    pub calls: u64,
    pub successes: u64,
    pub ema_success: f64,
    pub ema_latency: f64,
    #[serde(default)]
    pub last_called_at: Option<i64>,
    #[serde(default)]
    pub last_outcome_at: Option<i64>,
    /// Score computed by the last non-paused selection
    #[serde(default)]
    pub ucb_score: f64,
    /// Operator bias, -0.5..0.5
    #[serde(default)]
    pub bias: f64,
}

impl AgentStats {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            calls: 0,
            successes: 0,
            ema_success: 0.5,
            ema_latency: 2000.0,
            last_called_at: None,
            last_outcome_at: None,
            ucb_score: 0.0,
            bias: 0.0,
        }
    }
}

/// Point-in-time copy of the router state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterSnapshot {
    pub agents: BTreeMap<AgentId, AgentStats>,
    pub recent: Vec<Outcome>,
    pub version: u64,
    pub updated_at: i64,
}

/// Control-plane status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatus {
    pub paused: bool,
    pub version: u64,
    pub updated_at: i64,
}

/// Partial statistics applied by an operator override
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOverride {
    pub ema_success: Option<f64>,
    pub ema_latency: Option<f64>,
    pub bias: Option<f64>,
}

/// Legacy weight view keyed by short agent key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterWeight {
    pub agent_id: String,
    /// EMA success rounded to 4 decimals
    pub success_rate: f64,
    /// EMA latency rounded to whole milliseconds
    pub avg_latency: u64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl RouterWeight {
    pub fn from_stats(stats: &AgentStats, updated_at: i64) -> Self {
        Self {
            agent_id: stats.agent.short_key().to_string(),
            success_rate: (stats.ema_success * 10_000.0).round() / 10_000.0,
            avg_latency: stats.ema_latency.round() as u64,
            updated_at: chrono::DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
        }
    }
}
