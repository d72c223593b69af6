// packages/engine/src/security/access_gate.rs
//! Identity and rate-limit checks for agent actions
//!
//! A verdict is computed in two stages:
//!
//! ```text
//! verify(agent, presented fingerprint, action)
//!   ├─ identity: registered? fingerprint equal?   → deny + escalate threat
//!   └─ action rule
//!        Clone   : lineage depth < max_clone_depth
//!        Observe : < max_observations_per_minute allowed in the last 60 s
//!        Propose : < max_proposals_per_hour allowed in the last 3600 s
//! ```
//!
//! Rate rules count allowed actions per (agent, action) in their own
//! timestamp queues, expired only by age. The event log is a bounded display
//! history and plays no part in rate limiting. The threat level only ever
//! rises on its own; lowering it is an explicit operator call.

use crate::nexus::registry::{AgentFingerprint, AgentRegistry};
use crate::observability::names;
use crate::utils::config::GateConfig;
use crate::utils::now_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const OBSERVE_WINDOW_MS: i64 = 60_000;
const PROPOSE_WINDOW_MS: i64 = 3_600_000;

/// Hard cap on retained events, independent of age
const MAX_RETAINED_EVENTS: usize = 10_000;

/// Events returned by [`AccessGate::report`]
const REPORT_RECENT_EVENTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    /// Spawn a copy or child of the requester
    Clone,
    Observe,
    Propose,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Clone => "clone",
            GateAction::Observe => "observe",
            GateAction::Propose => "propose",
        }
    }
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered threat scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    #[default]
    Green,
    Yellow,
    Orange,
    Red,
}

impl ThreatLevel {
    /// Next level up; `Red` stays `Red`
    pub fn escalate(self) -> Self {
        match self {
            ThreatLevel::Green => ThreatLevel::Yellow,
            ThreatLevel::Yellow => ThreatLevel::Orange,
            ThreatLevel::Orange | ThreatLevel::Red => ThreatLevel::Red,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SecurityEventKind {
    ActionAllowed,
    UnknownAgent,
    FingerprintMismatch,
    CloneDepthExceeded { depth: u32, max: u32 },
    RateLimited { count: usize, limit: usize },
    ThreatLevelChanged { from: ThreatLevel, to: ThreatLevel },
}

/// One entry of the security log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<GateAction>,
    pub severity: Severity,
    pub blocked: bool,
    /// Threat level at the time of logging
    pub threat_level: ThreatLevel,
    pub timestamp: i64,
}

/// Why an action was denied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    UnknownAgent,
    FingerprintMismatch,
    CloneDepthExceeded { depth: u32, max: u32 },
    RateLimited { count: usize, limit: usize },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::UnknownAgent => write!(f, "unknown agent"),
            DenialReason::FingerprintMismatch => write!(f, "fingerprint mismatch"),
            DenialReason::CloneDepthExceeded { depth, max } => {
                write!(f, "clone depth {} reaches limit {}", depth, max)
            }
            DenialReason::RateLimited { count, limit } => {
                write!(f, "rate limited ({} of {})", count, limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(DenialReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Point-in-time security summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub enabled: bool,
    pub threat_level: ThreatLevel,
    pub known_agents: usize,
    pub total_events: u64,
    pub blocked_actions: u64,
    pub recent_events: Vec<SecurityEvent>,
}

#[derive(Default)]
struct GateState {
    threat_level: ThreatLevel,
    events: VecDeque<SecurityEvent>,
    /// Timestamps of allowed rate-limited actions
    allowed: HashMap<(String, GateAction), VecDeque<i64>>,
    total_events: u64,
    blocked_actions: u64,
}

impl GateState {
    fn log(
        &mut self,
        kind: SecurityEventKind,
        agent_id: &str,
        action: Option<GateAction>,
        severity: Severity,
        blocked: bool,
        now: i64,
    ) {
        let event = SecurityEvent {
            kind,
            agent_id: Some(agent_id.to_string()).filter(|id| !id.is_empty()),
            action,
            severity,
            blocked,
            threat_level: self.threat_level,
            timestamp: now,
        };

        if blocked {
            self.blocked_actions += 1;
            warn!(
                agent = agent_id,
                severity = ?event.severity,
                "Blocked {}: {:?}",
                action.map(|a| a.as_str()).unwrap_or("action"),
                event.kind
            );
        } else if severity >= Severity::High {
            warn!("Security event: {:?}", event.kind);
        } else {
            debug!(agent = agent_id, "Security event: {:?}", event.kind);
        }

        self.total_events += 1;
        self.events.push_back(event);
        while self.events.len() > MAX_RETAINED_EVENTS {
            self.events.pop_front();
        }
    }

    fn escalate(&mut self, agent_id: &str, now: i64) {
        let from = self.threat_level;
        let to = from.escalate();
        if to > from {
            self.threat_level = to;
            self.log(
                SecurityEventKind::ThreatLevelChanged { from, to },
                agent_id,
                None,
                Severity::High,
                false,
                now,
            );
        }
    }

    /// Allowed `action`s by `agent_id` strictly newer than `now - window_ms`.
    /// Older timestamps are dropped from the front of the queue.
    fn recent_count(&mut self, agent_id: &str, action: GateAction, window_ms: i64, now: i64) -> usize {
        let cutoff = now - window_ms;
        let key = (agent_id.to_string(), action);
        let Some(history) = self.allowed.get_mut(&key) else {
            return 0;
        };
        while history.front().map(|&t| t <= cutoff).unwrap_or(false) {
            history.pop_front();
        }
        if history.is_empty() {
            self.allowed.remove(&key);
            return 0;
        }
        history.iter().filter(|&&t| t > cutoff).count()
    }

    fn record_allowed(&mut self, agent_id: &str, action: GateAction, now: i64) {
        if matches!(action, GateAction::Observe | GateAction::Propose) {
            self.allowed
                .entry((agent_id.to_string(), action))
                .or_default()
                .push_back(now);
        }
    }
}

/// Advisory policy check; callers consult it before acting
pub struct AccessGate {
    registry: Arc<AgentRegistry>,
    config: GateConfig,
    state: Mutex<GateState>,
}

impl AccessGate {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_config(registry, GateConfig::default())
    }

    pub fn with_config(registry: Arc<AgentRegistry>, config: GateConfig) -> Self {
        Self {
            registry,
            config,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn threat_level(&self) -> ThreatLevel {
        self.state.lock().threat_level
    }

    /// Operator override; the gate never lowers the level by itself
    pub fn reset_threat_level(&self) {
        let mut state = self.state.lock();
        if state.threat_level != ThreatLevel::Green {
            info!("Threat level reset from {:?}", state.threat_level);
            state.threat_level = ThreatLevel::Green;
        }
    }

    /// Check `action` for `agent_id`, which presents `fingerprint` as its identity
    pub fn verify(&self, agent_id: &str, fingerprint: &AgentFingerprint, action: GateAction) -> Verdict {
        self.verify_at(agent_id, fingerprint, action, now_ms())
    }

    /// [`verify`](Self::verify) with an explicit clock reading in ms
    pub fn verify_at(
        &self,
        agent_id: &str,
        fingerprint: &AgentFingerprint,
        action: GateAction,
        now: i64,
    ) -> Verdict {
        if !self.config.enabled {
            return Verdict::Allowed;
        }

        let registered = self.registry.get(agent_id);
        let clone_depth = match action {
            GateAction::Clone => self.registry.lineage_depth(agent_id),
            _ => None,
        };

        let mut state = self.state.lock();

        let identity_failure = match registered {
            None => Some((SecurityEventKind::UnknownAgent, DenialReason::UnknownAgent)),
            Some(ref stored) if stored != fingerprint => Some((
                SecurityEventKind::FingerprintMismatch,
                DenialReason::FingerprintMismatch,
            )),
            Some(_) => None,
        };
        if let Some((kind, reason)) = identity_failure {
            state.log(kind, agent_id, Some(action), Severity::High, true, now);
            state.escalate(agent_id, now);
            return self.deny(action, reason);
        }

        let denial = match action {
            GateAction::Clone => {
                let depth = clone_depth.unwrap_or(0);
                let max = self.config.max_clone_depth;
                (depth >= max).then(|| {
                    (
                        DenialReason::CloneDepthExceeded { depth, max },
                        SecurityEventKind::CloneDepthExceeded { depth, max },
                        Severity::Medium,
                    )
                })
            }
            GateAction::Observe | GateAction::Propose => {
                let (limit, window_ms, severity) = match action {
                    GateAction::Observe => {
                        (self.config.max_observations_per_minute, OBSERVE_WINDOW_MS, Severity::Low)
                    }
                    _ => (self.config.max_proposals_per_hour, PROPOSE_WINDOW_MS, Severity::Medium),
                };
                let count = state.recent_count(agent_id, action, window_ms, now);
                (count >= limit).then(|| {
                    (
                        DenialReason::RateLimited { count, limit },
                        SecurityEventKind::RateLimited { count, limit },
                        severity,
                    )
                })
            }
        };

        match denial {
            Some((reason, kind, severity)) => {
                state.log(kind, agent_id, Some(action), severity, true, now);
                self.deny(action, reason)
            }
            None => {
                state.record_allowed(agent_id, action, now);
                state.log(
                    SecurityEventKind::ActionAllowed,
                    agent_id,
                    Some(action),
                    Severity::Info,
                    false,
                    now,
                );
                Verdict::Allowed
            }
        }
    }

    fn deny(&self, action: GateAction, reason: DenialReason) -> Verdict {
        metrics::counter!(names::GATE_DENIALS, "action" => action.as_str()).increment(1);
        Verdict::Denied(reason)
    }

    pub fn report(&self) -> SecurityReport {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(REPORT_RECENT_EVENTS);
        SecurityReport {
            enabled: self.config.enabled,
            threat_level: state.threat_level,
            known_agents: self.registry.len(),
            total_events: state.total_events,
            blocked_actions: state.blocked_actions,
            recent_events: state.events.iter().skip(skip).cloned().collect(),
        }
    }
}
