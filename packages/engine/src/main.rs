// packages/engine/src/main.rs
//! Nexus Engine
//!
//! Demo host: routes a synthetic task stream through the adaptive router,
//! drives a small agent hierarchy on the tick loop, and prunes agents whose
//! state keeps drifting.

use anyhow::{Context, Result};
use nexus_engine::nexus::registry::AgentRegistry;
use nexus_engine::observability::{init_metrics, init_tracing};
use nexus_engine::pruning::{Constraint, ConstraintKind, ConstraintOptimizer, DEFAULT_MIN_UTILITY};
use nexus_engine::routing::{spawn_autosave, store_from_config, AdaptiveRouter, AgentId, Outcome, RouteTask};
use nexus_engine::runtime::{AgentConfig, EventCallback, ExecutionRuntime, RuntimeEvent, SpawnRequest};
use nexus_engine::security::{AccessGate, GateAction};
use nexus_engine::utils::config::EngineConfig;
use nexus_engine::utils::now_ms;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ROOT_AGENT: &str = "nexus-root";
const TASK_KINDS: [&str; 4] = ["archive", "render", "prove", "simulate"];

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load().context("Failed to load configuration")?;

    init_tracing(config.observability.json_logs, &config.observability.log_level);
    if let Some(addr) = &config.observability.metrics_addr {
        init_metrics(addr)?;
    }

    info!("Starting Nexus Engine v{}", nexus_engine::VERSION);
    debug!("Configuration loaded: {:?}", config);

    // Router + persistence
    let router = Arc::new(AdaptiveRouter::with_config(&config.router));
    let store = store_from_config(&config.store);
    if let Some(snapshot) = store.load().await? {
        info!("Restoring router snapshot v{}", snapshot.version);
        router.restore(&snapshot);
    }

    let shutdown = CancellationToken::new();
    let autosave = (config.router.autosave_interval_secs > 0).then(|| {
        spawn_autosave(
            Arc::clone(&router),
            Arc::clone(&store),
            Duration::from_secs(config.router.autosave_interval_secs),
            shutdown.child_token(),
        )
    });

    // Agent hierarchy
    let registry = Arc::new(AgentRegistry::new());
    let runtime = Arc::new(ExecutionRuntime::from_engine_config(Arc::clone(&registry), &config));
    let gate = AccessGate::with_config(Arc::clone(&registry), config.gate.clone());

    runtime.register_agent(AgentConfig::new(ROOT_AGENT, "Nexus"))?;
    seed_hierarchy(&runtime, &registry, &gate);

    let callback: EventCallback = Arc::new(|event| match event {
        RuntimeEvent::Metrics(m) if m.drift => {
            warn!(agent = %m.agent_id, std_dev = m.std_dev, entropy = m.entropy, "Drift detected")
        }
        RuntimeEvent::Metrics(m) => debug!("{:?}", m.drift_event()),
        RuntimeEvent::Error { agent_id, message, .. } => warn!(agent = %agent_id, "{}", message),
    });
    runtime.start(Some(callback));

    let tasks = tokio::spawn(route_tasks(Arc::clone(&router), shutdown.child_token()));
    let pruning = tokio::spawn(prune_drifting(Arc::clone(&runtime), shutdown.child_token()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal, cleaning up...");

    shutdown.cancel();
    runtime.shutdown().await;
    tasks.await?;
    pruning.await?;
    if let Some(handle) = autosave {
        handle.await?;
    }

    let report = gate.report();
    info!(
        "Stopped: {} agents active, router v{}, threat level {:?}, {} blocked actions",
        runtime.active_count(),
        router.status().version,
        report.threat_level,
        report.blocked_actions
    );
    Ok(())
}

/// Fan out two levels under the root, asking the gate before every clone
fn seed_hierarchy(runtime: &ExecutionRuntime, registry: &AgentRegistry, gate: &AccessGate) {
    let mut frontier = vec![ROOT_AGENT.to_string()];
    for level in 1..=2u32 {
        let mut next = Vec::new();
        for parent in &frontier {
            let Some(fingerprint) = registry.get(parent) else {
                continue;
            };
            while runtime.controller().can_spawn(parent) {
                if !gate.verify(parent, &fingerprint, GateAction::Clone).is_allowed() {
                    break;
                }
                match runtime.spawn(SpawnRequest {
                    parent_id: parent.clone(),
                    name: format!("worker-l{}", level),
                    requested_depth: Some(level),
                }) {
                    Ok(id) => next.push(id),
                    Err(e) => {
                        warn!("Spawn under {} failed: {}", parent, e);
                        break;
                    }
                }
            }
        }
        frontier = next;
    }
    info!("Seeded hierarchy with {} agents", runtime.active_count());
}

/// Synthetic task stream: Simwright is fast and reliable, the rest are not
async fn route_tasks(router: Arc<AdaptiveRouter>, token: CancellationToken) {
    let mut rng = StdRng::from_entropy();
    let mut interval = tokio::time::interval(Duration::from_millis(250));
    let mut seq = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                seq += 1;
                let kind = TASK_KINDS[rng.gen_range(0..TASK_KINDS.len())];
                let task = RouteTask::new(format!("task-{}", seq), kind)
                    .with_difficulty(rng.gen_range(0.0..1.0));
                let agent = router.choose(Some(&task));

                let (p_success, latency) = match agent {
                    AgentId::Simwright => (0.9, rng.gen_range(80.0..200.0)),
                    _ => (0.4, rng.gen_range(800.0..3000.0)),
                };
                router.record_outcome(Outcome {
                    task_id: task.id.clone(),
                    agent,
                    success: rng.gen_bool(p_success),
                    latency_ms: latency,
                    confidence: None,
                    at: now_ms(),
                });
                if seq % 40 == 0 {
                    info!("Router weights: {:?}", router.weights());
                }
            }
        }
    }
}

/// Every 30 s, retire subtrees whose roots are drifting
async fn prune_drifting(runtime: Arc<ExecutionRuntime>, token: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let mut optimizer = ConstraintOptimizer::new();
                for id in runtime.agent_ids() {
                    let Some(process) = runtime.process(&id) else { continue };
                    let stable = runtime
                        .controller()
                        .assessment(&id)
                        .map(|a| !a.drift)
                        .unwrap_or(true);
                    let mut quality = Constraint::new("stability", ConstraintKind::Quality, 0.9, 1.0);
                    if !stable {
                        quality = quality.violated(0.0, 1.0);
                    }
                    optimizer.register_node(id.as_str(), process.depth, vec![quality]);
                }
                for id in runtime.agent_ids() {
                    for child in runtime.children(&id) {
                        optimizer.add_child(&id, child);
                    }
                }

                let mut pruned = optimizer.optimize_tree(DEFAULT_MIN_UTILITY);
                pruned.retain(|id| id != ROOT_AGENT);
                if !pruned.is_empty() {
                    let retired = runtime.retire(&pruned);
                    info!("Retired {} drifting agents ({:?})", retired, optimizer.stats());
                }
            }
        }
    }
}
