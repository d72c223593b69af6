// packages/engine/src/routing/router.rs
//! Adaptive router (EMA statistics + UCB-style exploration)
//!
//! Selects one agent from the fixed [`AgentId`] enumeration for every inbound
//! task and learns from reported outcomes.
//!
//! # Scoring
//!
//! ```text
//! utility = 0.75 · ema_success · (0.5 + difficulty)
//!         + 0.25 · 1 / max(200, ema_latency)
//!         + bias
//!
//! score   = utility + bonus                       (running)
//! bonus   = 1.25                      if calls < 5
//!         = 1.25 · sqrt(ln(total) / calls)        otherwise
//! score   = utility                               (paused)
//! ```
//!
//! All state, the pause flag included, sits behind one lock so a call never
//! observes a half-applied pause.

use crate::observability::names;
use crate::routing::types::{
    AgentId, AgentStats, Outcome, RouteTask, RouterSnapshot, RouterStatus, RouterWeight,
    StatsOverride,
};
use crate::utils::config::RouterConfig;
use crate::utils::now_ms;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

const EMA_ALPHA_SUCCESS: f64 = 0.2;
const EMA_ALPHA_LATENCY: f64 = 0.1;
const EXPLORATION_C: f64 = 1.25;
const MIN_CALLS_FOR_CONF: u64 = 5;
const MIN_LATENCY_FOR_SPEED: f64 = 200.0;

/// Latency inputs are clamped into this range before the EMA update
const MAX_LATENCY_MS: f64 = 3_600_000.0;

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

/// Difficulty-normalised expected utility of routing `task` to `stats.agent`
pub fn expected_utility(stats: &AgentStats, task: Option<&RouteTask>) -> f64 {
    let difficulty = match task.and_then(|t| t.difficulty) {
        Some(d) if d.is_finite() => clamp01(d),
        _ => 0.5,
    };
    let speed = 1.0 / stats.ema_latency.max(MIN_LATENCY_FOR_SPEED);
    0.75 * stats.ema_success * (0.5 + difficulty) + 0.25 * speed + stats.bias
}

/// Prediction error of an outcome against the utility predicted for it
pub fn compute_delta(success: bool, utility: f64) -> f64 {
    let actual = if success { 1.0 } else { 0.0 };
    actual - utility
}

struct RouterState {
    agents: BTreeMap<AgentId, AgentStats>,
    recent: VecDeque<Outcome>,
    version: u64,
    updated_at: i64,
    paused: bool,
}

impl RouterState {
    fn new() -> Self {
        Self {
            agents: AgentId::ALL
                .into_iter()
                .map(|a| (a, AgentStats::new(a)))
                .collect(),
            recent: VecDeque::new(),
            version: 1,
            updated_at: now_ms(),
            paused: false,
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_ms();
        self.version += 1;
    }
}

/// Adaptive multi-armed-bandit router
pub struct AdaptiveRouter {
    state: Mutex<RouterState>,
    recent_max: usize,
}

impl AdaptiveRouter {
    /// Create a router with default settings
    pub fn new() -> Self {
        Self::with_config(&RouterConfig::default())
    }

    pub fn with_config(config: &RouterConfig) -> Self {
        Self {
            state: Mutex::new(RouterState::new()),
            recent_max: config.recent_max.max(1),
        }
    }

    /// Select an agent for `task`.
    ///
    /// While running, the winner's call counter and timestamp are bumped.
    /// While paused, selection is read-only.
    pub fn choose(&self, task: Option<&RouteTask>) -> AgentId {
        let mut state = self.state.lock();

        if state.paused {
            let picked = state
                .agents
                .values()
                .map(|a| (a.agent, expected_utility(a, task)))
                .fold(None, |best: Option<(AgentId, f64)>, (agent, score)| match best {
                    Some((_, best_score)) if score <= best_score => best,
                    _ => Some((agent, score)),
                })
                .map(|(agent, _)| agent)
                .expect("router has no agents");
            debug!("Paused selection picked {}", picked);
            return picked;
        }

        let total_calls = state.agents.values().map(|a| a.calls).sum::<u64>() + 1;
        let ln_total = (total_calls as f64).ln();

        let mut best: Option<(AgentId, f64)> = None;
        for stats in state.agents.values_mut() {
            let bonus = if stats.calls < MIN_CALLS_FOR_CONF {
                EXPLORATION_C
            } else {
                EXPLORATION_C * (ln_total / stats.calls as f64).sqrt()
            };
            stats.ucb_score = expected_utility(stats, task) + bonus;

            match best {
                Some((_, score)) if stats.ucb_score <= score => {}
                _ => best = Some((stats.agent, stats.ucb_score)),
            }
        }

        let (picked, score) = best.expect("router has no agents");
        let now = now_ms();
        if let Some(stats) = state.agents.get_mut(&picked) {
            stats.calls += 1;
            stats.last_called_at = Some(now);
        }
        state.touch();

        metrics::counter!(names::ROUTER_CHOICES, "agent" => picked.as_str()).increment(1);
        debug!("Routed task {:?} to {} (score {:.4})", task.map(|t| &t.id), picked, score);
        picked
    }

    /// Apply an outcome report.
    ///
    /// Statistics are frozen while paused; the outcome still lands in the
    /// recent ring and the version still advances.
    pub fn record_outcome(&self, outcome: Outcome) {
        let mut state = self.state.lock();
        let paused = state.paused;

        if !paused {
            if let Some(stats) = state.agents.get_mut(&outcome.agent) {
                let hit = if outcome.success { 1.0 } else { 0.0 };
                stats.ema_success = clamp01(
                    (1.0 - EMA_ALPHA_SUCCESS) * stats.ema_success + EMA_ALPHA_SUCCESS * hit,
                );

                // NaN latency leaves the latency EMA untouched
                if !outcome.latency_ms.is_nan() {
                    let latency = outcome.latency_ms.clamp(0.0, MAX_LATENCY_MS);
                    stats.ema_latency = ((1.0 - EMA_ALPHA_LATENCY) * stats.ema_latency
                        + EMA_ALPHA_LATENCY * latency)
                        .max(1.0);
                }

                if outcome.success {
                    stats.successes += 1;
                }
                stats.last_outcome_at = Some(outcome.at);
            }

            metrics::counter!(
                names::ROUTER_OUTCOMES,
                "agent" => outcome.agent.as_str(),
                "success" => if outcome.success { "true" } else { "false" }
            )
            .increment(1);
            if outcome.latency_ms.is_finite() {
                metrics::histogram!(names::ROUTER_LATENCY_MS, "agent" => outcome.agent.as_str())
                    .record(outcome.latency_ms);
            }
        }

        state.recent.push_back(outcome);
        while state.recent.len() > self.recent_max {
            state.recent.pop_front();
        }
        state.touch();
    }

    /// Immutable copy of the current state
    pub fn snapshot(&self) -> RouterSnapshot {
        let state = self.state.lock();
        RouterSnapshot {
            agents: state.agents.clone(),
            recent: state.recent.iter().cloned().collect(),
            version: state.version,
            updated_at: state.updated_at,
        }
    }

    /// Merge a persisted snapshot into the live state.
    ///
    /// Agents present in the snapshot replace their live statistics, the
    /// recent ring is replaced, and the version never moves backwards.
    pub fn restore(&self, snapshot: &RouterSnapshot) {
        let mut state = self.state.lock();
        for (agent, stats) in &snapshot.agents {
            let mut stats = stats.clone();
            stats.agent = *agent;
            stats.ema_success = clamp01(stats.ema_success);
            stats.ema_latency = if stats.ema_latency.is_finite() {
                stats.ema_latency.max(1.0)
            } else {
                2000.0
            };
            stats.bias = if stats.bias.is_finite() {
                stats.bias.clamp(-0.5, 0.5)
            } else {
                0.0
            };
            state.agents.insert(*agent, stats);
        }

        let skip = snapshot.recent.len().saturating_sub(self.recent_max);
        state.recent = snapshot.recent.iter().skip(skip).cloned().collect();
        state.version = state.version.max(snapshot.version);
        state.touch();

        info!("Router state restored from snapshot v{}", snapshot.version);
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        state.paused = true;
        state.touch();
        metrics::gauge!(names::ROUTER_PAUSED).set(1.0);
        info!("Router paused at v{}", state.version);
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.touch();
        metrics::gauge!(names::ROUTER_PAUSED).set(0.0);
        info!("Router resumed at v{}", state.version);
    }

    pub fn status(&self) -> RouterStatus {
        let state = self.state.lock();
        RouterStatus {
            paused: state.paused,
            version: state.version,
            updated_at: state.updated_at,
        }
    }

    /// Operator override; out-of-range values are clamped, not rejected
    pub fn set_override(&self, agent: AgentId, over: StatsOverride) {
        let mut state = self.state.lock();
        if let Some(stats) = state.agents.get_mut(&agent) {
            if let Some(v) = over.ema_success {
                stats.ema_success = clamp01(v);
            }
            if let Some(v) = over.ema_latency {
                stats.ema_latency = if v.is_nan() { 1.0 } else { v.clamp(1.0, f64::MAX) };
            }
            if let Some(v) = over.bias {
                stats.bias = if v.is_nan() { 0.0 } else { v.clamp(-0.5, 0.5) };
            }
            info!(
                "Override applied to {}: success={:.3} latency={:.1} bias={:.2}",
                agent, stats.ema_success, stats.ema_latency, stats.bias
            );
        }
        state.touch();
    }

    /// Expected utility of `agent` for `task` under the current statistics
    pub fn expected_utility(&self, agent: AgentId, task: Option<&RouteTask>) -> f64 {
        let state = self.state.lock();
        state
            .agents
            .get(&agent)
            .map(|stats| expected_utility(stats, task))
            .unwrap_or(0.0)
    }

    /// Legacy per-agent weight view
    pub fn weights(&self) -> BTreeMap<&'static str, RouterWeight> {
        let state = self.state.lock();
        state
            .agents
            .values()
            .map(|stats| {
                (
                    stats.agent.short_key(),
                    RouterWeight::from_stats(stats, state.updated_at),
                )
            })
            .collect()
    }

    /// Reset all statistics to their initial values
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let version = state.version;
        *state = RouterState::new();
        state.version = version + 1;
    }
}

impl Default for AdaptiveRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn outcome(agent: AgentId, success: bool, latency_ms: f64) -> Outcome {
        Outcome {
            task_id: ulid::Ulid::new().to_string(),
            agent,
            success,
            latency_ms,
            confidence: None,
            at: now_ms(),
        }
    }

    #[test]
    fn test_initial_snapshot() {
        let router = AdaptiveRouter::new();
        let snap = router.snapshot();
        assert_eq!(snap.agents.len(), AgentId::ALL.len());
        assert_eq!(snap.version, 1);
        assert!(snap.recent.is_empty());
    }

    #[test]
    fn test_choose_increments_calls_and_version() {
        let router = AdaptiveRouter::new();
        let picked = router.choose(None);
        // all agents tie on the first call
        assert_eq!(picked, AgentId::EchoArchivist);

        let snap = router.snapshot();
        assert_eq!(snap.agents[&picked].calls, 1);
        assert!(snap.agents[&picked].last_called_at.is_some());
        assert_eq!(snap.version, 2);
    }

    #[test]
    fn test_exploration_visits_every_agent() {
        let router = AdaptiveRouter::new();
        let task = RouteTask::new("t", "generic").with_difficulty(0.5);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..40 {
            seen.insert(router.choose(Some(&task)));
        }
        assert_eq!(seen.len(), AgentId::ALL.len());

        let snap = router.snapshot();
        for stats in snap.agents.values() {
            assert!(stats.calls >= MIN_CALLS_FOR_CONF);
        }
    }

    #[test]
    fn test_outcome_updates_ema() {
        let router = AdaptiveRouter::new();
        router.record_outcome(outcome(AgentId::Mathwright, true, 1000.0));

        let stats = &router.snapshot().agents[&AgentId::Mathwright];
        assert!((stats.ema_success - 0.6).abs() < 1e-12);
        assert!((stats.ema_latency - 1900.0).abs() < 1e-9);
        assert_eq!(stats.successes, 1);
    }

    #[test]
    fn test_paused_choice_has_no_side_effects() {
        let router = AdaptiveRouter::new();
        router.set_override(AgentId::Mathwright, StatsOverride {
            ema_success: Some(0.9),
            ..Default::default()
        });
        router.pause();
        let before = router.snapshot();

        for _ in 0..10 {
            assert_eq!(router.choose(None), AgentId::Mathwright);
        }

        assert_eq!(router.snapshot(), before);
    }

    #[test]
    fn test_paused_outcomes_only_grow_ring() {
        let router = AdaptiveRouter::new();
        router.pause();
        let before = router.snapshot();

        router.record_outcome(outcome(AgentId::Simwright, true, 50.0));
        router.record_outcome(outcome(AgentId::Fractalwright, false, 9000.0));

        let after = router.snapshot();
        assert_eq!(after.agents, before.agents);
        assert_eq!(after.recent.len(), 2);
        assert_eq!(after.version, before.version + 2);
    }

    #[test]
    fn test_recent_ring_is_bounded() {
        let router = AdaptiveRouter::with_config(&RouterConfig {
            recent_max: 3,
            ..Default::default()
        });
        for i in 0..5 {
            let mut o = outcome(AgentId::EchoArchivist, true, 10.0);
            o.task_id = format!("t{}", i);
            router.record_outcome(o);
        }
        let recent = router.snapshot().recent;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].task_id, "t2");
        assert_eq!(recent[2].task_id, "t4");
    }

    #[test]
    fn test_override_clamps() {
        let router = AdaptiveRouter::new();
        router.set_override(AgentId::Simwright, StatsOverride {
            ema_success: Some(4.0),
            ema_latency: Some(-30.0),
            bias: Some(2.0),
        });
        let stats = &router.snapshot().agents[&AgentId::Simwright];
        assert_eq!(stats.ema_success, 1.0);
        assert_eq!(stats.ema_latency, 1.0);
        assert_eq!(stats.bias, 0.5);
    }

    #[test]
    fn test_bias_steers_paused_selection() {
        let router = AdaptiveRouter::new();
        router.set_override(AgentId::Fractalwright, StatsOverride {
            bias: Some(0.1),
            ..Default::default()
        });
        router.pause();
        assert_eq!(router.choose(None), AgentId::Fractalwright);
    }

    #[test]
    fn test_status_and_resume() {
        let router = AdaptiveRouter::new();
        router.pause();
        assert!(router.status().paused);
        router.resume();
        let status = router.status();
        assert!(!status.paused);
        assert_eq!(status.version, 3);
    }

    #[test]
    fn test_restore_round_trip() {
        let source = AdaptiveRouter::new();
        for _ in 0..10 {
            let agent = source.choose(None);
            source.record_outcome(outcome(agent, agent == AgentId::Simwright, 300.0));
        }
        let snap = source.snapshot();

        let target = AdaptiveRouter::new();
        target.restore(&snap);
        let restored = target.snapshot();
        assert_eq!(restored.agents, snap.agents);
        assert_eq!(restored.recent, snap.recent);
        assert!(restored.version > snap.version);
    }

    #[test]
    fn test_compute_delta() {
        let router = AdaptiveRouter::new();
        let utility = router.expected_utility(AgentId::EchoArchivist, None);
        // 0.75 * 0.5 * 1.0 + 0.25 / 2000
        assert!((utility - 0.375125).abs() < 1e-12);
        assert!((compute_delta(true, utility) - 0.624875).abs() < 1e-12);
        assert!((compute_delta(false, utility) + 0.375125).abs() < 1e-12);
    }

    #[test]
    fn test_weights_view() {
        let router = AdaptiveRouter::new();
        let weights = router.weights();
        assert_eq!(weights.len(), 4);
        assert_eq!(weights["sim"].success_rate, 0.5);
        assert_eq!(weights["echo"].avg_latency, 2000);
    }

    fn latency_strategy() -> impl Strategy<Value = f64> {
        prop_oneof![
            -1e12f64..1e12f64,
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            Just(f64::MAX),
            Just(-0.0),
        ]
    }

    proptest! {
        #[test]
        fn prop_ema_bounds_hold(
            events in prop::collection::vec((0usize..4, any::<bool>(), latency_strategy()), 1..200)
        ) {
            let router = AdaptiveRouter::new();
            for (idx, success, latency) in events {
                router.record_outcome(outcome(AgentId::ALL[idx], success, latency));
                for stats in router.snapshot().agents.values() {
                    prop_assert!((0.0..=1.0).contains(&stats.ema_success));
                    prop_assert!(stats.ema_latency >= 1.0);
                    prop_assert!(stats.ema_latency.is_finite());
                }
            }
        }

        #[test]
        fn prop_paused_outcomes_freeze_stats(
            warmup in prop::collection::vec((0usize..4, any::<bool>(), 0f64..10_000f64), 0..50),
            paused in prop::collection::vec((0usize..4, any::<bool>(), latency_strategy()), 1..100)
        ) {
            let router = AdaptiveRouter::new();
            for (idx, success, latency) in warmup {
                router.record_outcome(outcome(AgentId::ALL[idx], success, latency));
            }
            router.pause();
            let before = router.snapshot();
            let count = paused.len();
            for (idx, success, latency) in paused {
                router.record_outcome(outcome(AgentId::ALL[idx], success, latency));
            }
            let after = router.snapshot();
            prop_assert_eq!(&after.agents, &before.agents);
            prop_assert_eq!(after.recent.len(), (before.recent.len() + count).min(250));
        }

        #[test]
        fn prop_choice_stays_in_enumeration(difficulty in -2.0f64..3.0, paused in any::<bool>()) {
            let router = AdaptiveRouter::new();
            if paused {
                router.pause();
            }
            let task = RouteTask::new("t", "k").with_difficulty(difficulty);
            let picked = router.choose(Some(&task));
            prop_assert!(AgentId::ALL.contains(&picked));
        }
    }
}
