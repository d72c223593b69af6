// packages/engine/src/runtime/execution.rs
//! Execution runtime: fixed-rate tick loop over active agents
//!
//! Every tick:
//! - snapshots the active process table
//! - steps all processes concurrently, each under the step timeout
//! - routes every result through [`SpawnController::step`]
//! - emits one [`RuntimeEvent`] per agent to the subscriber, serially
//!
//! A failing, panicking or slow agent produces an error event for that agent
//! only; the rest of the tick is unaffected.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► [interval ─► tick ─► tick ─► ...] ──► stop()
//!                                         │
//!                     in-flight tick finishes, timer cancelled
//! ```

use crate::nexus::controller::{SpawnController, StepResult};
use crate::nexus::registry::{content_hash, AgentFingerprint, AgentRegistry};
use crate::nexus::spawn_policy::{SpawnContext, SpawnPolicy};
use crate::observability::names;
use crate::runtime::process::{AgentBehavior, AgentProcess, SyntheticBehavior};
use crate::utils::config::{DriftConfig, EngineConfig, RuntimeConfig};
use crate::utils::errors::{EngineError, Result};
use crate::utils::now_ms;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Version stamped into fingerprints of runtime-created agents
const AGENT_VERSION: &str = "1.0.0";

/// Configuration for registering a top-level or explicitly placed agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Owning user, if the host tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            depth: 0,
            parent_id: None,
            owner: None,
        }
    }
}

/// Request to spawn a child under a running agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub parent_id: String,
    pub name: String,
    /// Depth the caller expects the child to land at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_depth: Option<u32>,
}

/// Per-tick metrics for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetrics {
    pub agent_id: String,
    pub state: Vec<f64>,
    pub drift: bool,
    pub std_dev: f64,
    pub entropy: f64,
    pub timestamp: i64,
}

impl RuntimeMetrics {
    fn from_step(agent_id: String, step: StepResult) -> Self {
        Self {
            agent_id,
            state: step.state,
            drift: step.drift,
            std_dev: step.std_dev,
            entropy: step.entropy,
            timestamp: now_ms(),
        }
    }

    /// Telemetry-sink shape without the raw state vector
    pub fn drift_event(&self) -> DriftEvent {
        DriftEvent {
            agent_id: self.agent_id.clone(),
            std_dev: self.std_dev,
            entropy: self.entropy,
            drift: self.drift,
            timestamp: self.timestamp,
        }
    }
}

/// Drift stream record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEvent {
    pub agent_id: String,
    pub std_dev: f64,
    pub entropy: f64,
    pub drift: bool,
    pub timestamp: i64,
}

/// Event delivered to the runtime subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Metrics(RuntimeMetrics),
    Error {
        agent_id: String,
        message: String,
        timestamp: i64,
    },
}

impl RuntimeEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            RuntimeEvent::Metrics(m) => &m.agent_id,
            RuntimeEvent::Error { agent_id, .. } => agent_id,
        }
    }
}

/// Subscriber callback
pub type EventCallback = Arc<dyn Fn(RuntimeEvent) + Send + Sync>;

struct Shared {
    config: RuntimeConfig,
    registry: Arc<AgentRegistry>,
    controller: SpawnController,
    active: DashMap<String, AgentProcess>,
    tick_count: AtomicU64,
    callback: RwLock<Option<EventCallback>>,
}

impl Shared {
    async fn tick(&self) -> Vec<RuntimeEvent> {
        let started = Instant::now();
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;

        let mut processes: Vec<AgentProcess> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        processes.sort_by(|a, b| a.id.cmp(&b.id));

        let timeout = self.config.step_timeout();
        let steps = processes.iter().map(|process| async move {
            let guarded = AssertUnwindSafe(self.controller.step(process, tick)).catch_unwind();
            let result = match tokio::time::timeout(timeout, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(EngineError::StepFailed {
                    agent_id: process.id.clone(),
                    reason: "step panicked".into(),
                }),
                Err(_) => Err(EngineError::StepTimeout(process.id.clone())),
            };
            (process.id.clone(), result)
        });
        let results = join_all(steps).await;

        let events: Vec<RuntimeEvent> = results
            .into_iter()
            .map(|(agent_id, result)| match result {
                Ok(step) => RuntimeEvent::Metrics(RuntimeMetrics::from_step(agent_id, step)),
                Err(e) => {
                    error!("Agent {} execution error at tick {}: {}", agent_id, tick, e);
                    metrics::counter!(names::STEP_ERRORS, "agent" => agent_id.clone()).increment(1);
                    RuntimeEvent::Error {
                        agent_id,
                        message: e.to_string(),
                        timestamp: now_ms(),
                    }
                }
            })
            .collect();

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            for event in &events {
                callback(event.clone());
            }
        }

        metrics::counter!(names::TICKS).increment(1);
        metrics::histogram!(names::TICK_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!("Tick {} processed {} agents in {:?}", tick, events.len(), started.elapsed());
        events
    }
}

/// Owner of the active agent table and the tick loop
pub struct ExecutionRuntime {
    shared: Arc<Shared>,
    running: AtomicBool,
    loop_handle: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ExecutionRuntime {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default(), DriftConfig::default())
    }

    pub fn from_engine_config(registry: Arc<AgentRegistry>, config: &EngineConfig) -> Self {
        Self::with_config(registry, config.runtime.clone(), config.drift)
    }

    pub fn with_config(registry: Arc<AgentRegistry>, config: RuntimeConfig, drift: DriftConfig) -> Self {
        let controller = SpawnController::with_drift_config(Arc::clone(&registry), drift);
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                controller,
                active: DashMap::new(),
                tick_count: AtomicU64::new(0),
                callback: RwLock::new(None),
            }),
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.shared.registry
    }

    pub fn controller(&self) -> &SpawnController {
        &self.shared.controller
    }

    /// Register an agent driven by the synthetic state generator
    pub fn register_agent(&self, config: AgentConfig) -> Result<AgentProcess> {
        let behavior = Arc::new(SyntheticBehavior::new(
            &config.id,
            config.depth,
            self.shared.config.state_dimension,
        ));
        self.register_with_behavior(config, behavior)
    }

    /// Register an agent with a caller-supplied behavior.
    ///
    /// When `parent_id` names a known agent, `depth` must sit exactly one
    /// level below it.
    pub fn register_with_behavior(
        &self,
        config: AgentConfig,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Result<AgentProcess> {
        SpawnPolicy::validate_depth(config.depth)?;

        if let Some(parent_id) = config.parent_id.as_deref() {
            let parent_depth = self
                .shared
                .active
                .get(parent_id)
                .map(|p| p.depth)
                .or_else(|| self.shared.registry.lineage_depth(parent_id));
            if let Some(parent_depth) = parent_depth {
                if config.depth != parent_depth + 1 {
                    return Err(EngineError::InvalidRequest(format!(
                        "agent {} declares depth {} under {} at depth {}",
                        config.id, config.depth, parent_id, parent_depth
                    )));
                }
            }
        }

        let mut fingerprint = AgentFingerprint::new(
            config.name.as_str(),
            AGENT_VERSION,
            content_hash(&[&config.id, &config.name, &config.depth.to_string()]),
        );
        fingerprint.parent = config.parent_id.clone();
        self.shared.registry.register(config.id.as_str(), fingerprint)?;

        let lineage_root = config
            .parent_id
            .as_deref()
            .and_then(|p| self.shared.registry.lineage_root(p))
            .or_else(|| config.parent_id.clone());
        let ctx = SpawnContext {
            depth: config.depth,
            parent_id: config.parent_id.clone(),
            lineage_root,
        };
        let process = AgentProcess::new(config.id.as_str(), ctx, behavior);
        self.activate(process.clone());

        info!("Registered agent: {} ({})", config.id, process.behavior_kind());
        Ok(process)
    }

    /// Spawn a synthetic child under an active parent.
    ///
    /// `requested_depth`, when given, must be a legal depth and must equal
    /// the depth the child will actually occupy.
    pub fn spawn(&self, request: SpawnRequest) -> Result<String> {
        let dimension = self.shared.config.state_dimension;
        self.spawn_with(request, move |id, ctx| {
            Arc::new(SyntheticBehavior::new(id, ctx.depth, dimension))
        })
    }

    /// Spawn a child whose behavior is built by `make_behavior`
    pub fn spawn_with<B>(&self, request: SpawnRequest, make_behavior: B) -> Result<String>
    where
        B: FnOnce(&str, &SpawnContext) -> Arc<dyn AgentBehavior>,
    {
        if request.name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("agent name must not be empty".into()));
        }

        let parent = self
            .shared
            .active
            .get(&request.parent_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| EngineError::UnknownAgent(request.parent_id.clone()))?;

        if let Some(requested) = request.requested_depth {
            SpawnPolicy::validate_depth(requested)?;
            if requested != parent.depth + 1 {
                return Err(EngineError::InvalidRequest(format!(
                    "requested depth {} but child of {} lands at {}",
                    requested,
                    parent.id,
                    parent.depth + 1
                )));
            }
        }

        let child_id = format!("agent_{}", ulid::Ulid::new().to_string().to_lowercase());
        let registry = &self.shared.registry;
        let child = self.shared.controller.safe_spawn(&parent, |ctx| {
            let fingerprint = AgentFingerprint::new(
                request.name.as_str(),
                AGENT_VERSION,
                content_hash(&[&child_id, &request.name, &ctx.depth.to_string()]),
            )
            .with_parent(parent.id.as_str());
            registry.register(child_id.as_str(), fingerprint)?;
            let behavior = make_behavior(&child_id, &ctx);
            Ok(AgentProcess::new(child_id.as_str(), ctx, behavior))
        })?;

        let id = child.id.clone();
        self.activate(child);
        info!("Spawned agent {} under {}", id, request.parent_id);
        Ok(id)
    }

    fn activate(&self, process: AgentProcess) {
        self.shared.active.insert(process.id.clone(), process);
        metrics::gauge!(names::ACTIVE_AGENTS).set(self.shared.active.len() as f64);
    }

    /// Stop driving an agent. Its registry entry is kept.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.shared.active.remove(agent_id).is_some();
        if removed {
            self.shared.controller.forget(agent_id);
            metrics::gauge!(names::ACTIVE_AGENTS).set(self.shared.active.len() as f64);
            info!("Unregistered agent: {}", agent_id);
        }
        removed
    }

    /// Unregister every listed agent; returns how many were active
    pub fn retire(&self, agent_ids: &[String]) -> usize {
        agent_ids
            .iter()
            .filter(|id| self.unregister_agent(id))
            .count()
    }

    /// Start the tick loop. Must be called inside a Tokio runtime.
    ///
    /// The tick counter carries on from previous runs, so a tick left in
    /// flight by an earlier `stop` never shares its number with a new one.
    pub fn start(&self, callback: Option<EventCallback>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Runtime already running");
            return;
        }

        *self.shared.callback.write() = callback;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let shared = Arc::clone(&self.shared);
        let period = self.shared.config.tick_interval();

        info!("Starting execution loop ({:?} period)", period);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        shared.tick().await;
                    }
                }
            }
            debug!("Execution loop exited");
        });

        *self.loop_handle.lock() = Some((token, handle));
    }

    /// Cancel the timer; an in-flight tick is allowed to finish
    pub fn stop(&self) {
        if self.halt().is_some() {
            info!("Stopped execution loop");
        }
    }

    /// Stop and wait for any in-flight tick to complete
    pub async fn shutdown(&self) {
        if let Some(handle) = self.halt() {
            if let Err(e) = handle.await {
                error!("Execution loop ended abnormally: {}", e);
            }
            info!("Execution loop shut down");
        }
    }

    fn halt(&self) -> Option<JoinHandle<()>> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return None;
        }
        let (token, handle) = self.loop_handle.lock().take()?;
        token.cancel();
        Some(handle)
    }

    /// Run a single tick immediately, outside the timer
    pub async fn tick_once(&self) -> Vec<RuntimeEvent> {
        self.shared.tick().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn tick_count(&self) -> u64 {
        self.shared.tick_count.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.len()
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.shared.active.contains_key(agent_id)
    }

    pub fn process(&self, agent_id: &str) -> Option<AgentProcess> {
        self.shared.active.get(agent_id).map(|p| p.value().clone())
    }

    /// Active agent ids, sorted
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Registered children of `parent_id`, in spawn order
    pub fn children(&self, parent_id: &str) -> Vec<String> {
        self.shared.controller.children(parent_id)
    }
}

impl Drop for ExecutionRuntime {
    fn drop(&mut self) {
        if let Some((token, _handle)) = self.loop_handle.get_mut().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::process::FnBehavior;
    use std::time::Duration;

    fn runtime_with(tick_ms: u64, timeout_ms: u64) -> ExecutionRuntime {
        ExecutionRuntime::with_config(
            Arc::new(AgentRegistry::new()),
            RuntimeConfig {
                tick_interval_ms: tick_ms,
                state_dimension: 4,
                step_timeout_ms: timeout_ms,
            },
            DriftConfig::default(),
        )
    }

    fn collector() -> (EventCallback, Arc<Mutex<Vec<RuntimeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: EventCallback = Arc::new(move |e| sink.lock().push(e));
        (callback, events)
    }

    #[tokio::test]
    async fn test_register_and_tick() {
        let runtime = runtime_with(1000, 1000);
        runtime.register_agent(AgentConfig::new("a", "Alpha")).unwrap();
        runtime.register_agent(AgentConfig::new("b", "Beta")).unwrap();
        assert_eq!(runtime.active_count(), 2);
        assert!(runtime.registry().has("a"));

        let events = runtime.tick_once().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].agent_id(), "a");
        match &events[1] {
            RuntimeEvent::Metrics(m) => {
                assert_eq!(m.state.len(), 4);
                assert_eq!(m.drift_event().agent_id, "b");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(runtime.tick_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let runtime = runtime_with(1000, 1000);
        runtime.register_agent(AgentConfig::new("a", "Alpha")).unwrap();
        let err = runtime.register_agent(AgentConfig::new("a", "Alpha")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAgent(_)));
        assert_eq!(runtime.active_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_agent_isolated() {
        let runtime = runtime_with(1000, 1000);
        runtime.register_agent(AgentConfig::new("good", "Good")).unwrap();
        runtime
            .register_with_behavior(
                AgentConfig::new("bad", "Bad"),
                Arc::new(FnBehavior::new(|_| {
                    Err(EngineError::StepFailed {
                        agent_id: "bad".into(),
                        reason: "exploded".into(),
                    })
                })),
            )
            .unwrap();
        let (callback, seen) = collector();
        *runtime.shared.callback.write() = Some(callback);

        let events = runtime.tick_once().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RuntimeEvent::Error { agent_id, message, .. }
            if agent_id == "bad" && message.contains("exploded")));
        assert!(matches!(&events[1], RuntimeEvent::Metrics(m) if m.agent_id == "good"));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_agent_isolated() {
        let runtime = runtime_with(1000, 1000);
        runtime.register_agent(AgentConfig::new("calm", "Calm")).unwrap();
        runtime
            .register_with_behavior(
                AgentConfig::new("loud", "Loud"),
                Arc::new(FnBehavior::new(|_| panic!("agent bug"))),
            )
            .unwrap();

        let events = runtime.tick_once().await;
        assert!(matches!(&events[0], RuntimeEvent::Metrics(m) if m.agent_id == "calm"));
        assert!(matches!(&events[1], RuntimeEvent::Error { message, .. } if message.contains("panicked")));
    }

    struct SlowBehavior;

    #[async_trait::async_trait]
    impl AgentBehavior for SlowBehavior {
        async fn step(&self, _tick: u64) -> Result<Vec<f64>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.0])
        }
    }

    #[tokio::test]
    async fn test_slow_agent_times_out() {
        let runtime = runtime_with(1000, 50);
        runtime.register_agent(AgentConfig::new("fast", "Fast")).unwrap();
        runtime
            .register_with_behavior(AgentConfig::new("slow", "Slow"), Arc::new(SlowBehavior))
            .unwrap();

        let started = Instant::now();
        let events = runtime.tick_once().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(&events[0], RuntimeEvent::Metrics(m) if m.agent_id == "fast"));
        assert!(matches!(&events[1], RuntimeEvent::Error { message, .. } if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_spawn_through_runtime() {
        let runtime = runtime_with(1000, 1000);
        runtime.register_agent(AgentConfig::new("root", "Root")).unwrap();

        let child = runtime
            .spawn(SpawnRequest {
                parent_id: "root".into(),
                name: "Worker".into(),
                requested_depth: Some(1),
            })
            .unwrap();
        assert!(runtime.has_agent(&child));
        let process = runtime.process(&child).unwrap();
        assert_eq!(process.depth, 1);
        assert_eq!(process.lineage_root.as_deref(), Some("root"));
        assert_eq!(runtime.children("root"), vec![child]);

        let wrong_depth = runtime.spawn(SpawnRequest {
            parent_id: "root".into(),
            name: "Worker".into(),
            requested_depth: Some(3),
        });
        assert!(matches!(wrong_depth, Err(EngineError::InvalidRequest(_))));

        let unknown = runtime.spawn(SpawnRequest {
            parent_id: "nobody".into(),
            name: "Worker".into(),
            requested_depth: None,
        });
        assert!(matches!(unknown, Err(EngineError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_unregister_and_retire() {
        let runtime = runtime_with(1000, 1000);
        for id in ["a", "b", "c"] {
            runtime.register_agent(AgentConfig::new(id, id)).unwrap();
        }
        assert!(runtime.unregister_agent("a"));
        assert!(!runtime.unregister_agent("a"));
        assert_eq!(runtime.retire(&["b".to_string(), "zzz".to_string()]), 1);
        assert_eq!(runtime.agent_ids(), vec!["c"]);
        // registry is append-only
        assert!(runtime.registry().has("a"));
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let runtime = runtime_with(10, 1000);
        runtime.register_agent(AgentConfig::new("a", "Alpha")).unwrap();
        let (callback, seen) = collector();

        runtime.stop();
        runtime.start(Some(callback.clone()));
        runtime.start(Some(callback));
        assert!(runtime.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        runtime.shutdown().await;
        assert!(!runtime.is_running());

        let count = seen.lock().len();
        assert!(count >= 2, "expected several ticks, got {}", count);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().len(), count);
        runtime.stop();
    }

    #[tokio::test]
    async fn test_registered_depth_follows_parent() {
        let runtime = runtime_with(1000, 1000);
        runtime.register_agent(AgentConfig::new("p", "Parent")).unwrap();

        let mut skipped = AgentConfig::new("skip", "Skip");
        skipped.parent_id = Some("p".into());
        skipped.depth = 3;
        assert!(matches!(
            runtime.register_agent(skipped),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(!runtime.registry().has("skip"));

        let mut child = AgentConfig::new("c", "Child");
        child.parent_id = Some("p".into());
        child.depth = 1;
        let process = runtime.register_agent(child).unwrap();
        assert_eq!(process.lineage_root.as_deref(), Some("p"));
        assert_eq!(runtime.registry().children("p"), vec!["c"]);
    }

    #[tokio::test]
    async fn test_restart_keeps_tick_numbers_increasing() {
        let runtime = runtime_with(10, 1000);
        runtime.register_agent(AgentConfig::new("a", "Alpha")).unwrap();

        runtime.tick_once().await;
        runtime.tick_once().await;
        assert_eq!(runtime.tick_count(), 2);

        runtime.start(None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.stop();
        let before_restart = runtime.tick_count();
        assert!(before_restart > 2);

        runtime.start(None);
        assert!(runtime.tick_count() >= before_restart);
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.shutdown().await;
        assert!(runtime.tick_count() > before_restart);
        assert!(runtime.controller().assessment("a").is_some());
    }

    #[tokio::test]
    async fn test_soft_stop_finishes_inflight_tick() {
        struct Sluggish;

        #[async_trait::async_trait]
        impl AgentBehavior for Sluggish {
            async fn step(&self, tick: u64) -> Result<Vec<f64>> {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(vec![tick as f64])
            }
        }

        let runtime = runtime_with(10, 1000);
        runtime
            .register_with_behavior(AgentConfig::new("s", "Sluggish"), Arc::new(Sluggish))
            .unwrap();
        let (callback, seen) = collector();
        runtime.start(Some(callback));

        // first tick fires at 10ms and is mid-step at 40ms
        tokio::time::sleep(Duration::from_millis(40)).await;
        runtime.shutdown().await;

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RuntimeEvent::Metrics(_)));
    }
}
