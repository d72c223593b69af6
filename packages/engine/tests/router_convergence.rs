// packages/engine/tests/router_convergence.rs
//! Router behavior over long outcome streams

use nexus_engine::routing::{AdaptiveRouter, AgentId, Outcome, RouteTask};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const WORKERS: u64 = 8;
const ROUNDS: u64 = 250;

fn report(router: &AdaptiveRouter, task: &RouteTask, agent: AgentId, success: bool, latency_ms: f64) {
    router.record_outcome(Outcome {
        task_id: task.id.clone(),
        agent,
        success,
        latency_ms,
        confidence: None,
        at: 0,
    });
}

fn total_calls(router: &AdaptiveRouter) -> u64 {
    router.snapshot().agents.values().map(|s| s.calls).sum()
}

fn assert_stats_bounded(router: &AdaptiveRouter) {
    for stats in router.snapshot().agents.values() {
        assert!((0.0..=1.0).contains(&stats.ema_success), "{:?}", stats);
        assert!(stats.ema_latency >= 1.0, "{:?}", stats);
    }
}

/// Each worker routes and reports `ROUNDS` tasks
fn hammer(router: &AdaptiveRouter, worker: u64) {
    for i in 0..ROUNDS {
        let task = RouteTask::new(format!("w{}-{}", worker, i), "simulate")
            .with_difficulty((i % 10) as f64 / 10.0);
        let agent = router.choose(Some(&task));
        report(router, &task, agent, (i + worker) % 3 != 0, 50.0 + (i % 13) as f64 * 90.0);
    }
}

#[test]
fn test_concurrent_routing_counts_every_call() {
    let router = AdaptiveRouter::new();
    let start = router.status().version;

    std::thread::scope(|s| {
        for worker in 0..WORKERS {
            let router = &router;
            s.spawn(move || hammer(router, worker));
        }
    });

    let ops = WORKERS * ROUNDS;
    assert_eq!(total_calls(&router), ops);
    // one bump per choose and one per record
    assert_eq!(router.status().version, start + 2 * ops);
    assert_eq!(router.snapshot().recent.len(), 250);
    assert_stats_bounded(&router);
}

#[test]
fn test_concurrent_routing_while_paused_is_read_only() {
    let router = AdaptiveRouter::new();
    let task = RouteTask::new("warm", "any");
    for _ in 0..50 {
        let agent = router.choose(Some(&task));
        report(&router, &task, agent, agent == AgentId::Simwright, 300.0);
    }

    router.pause();
    let frozen = router.snapshot().agents;
    let paused_at = router.status().version;

    std::thread::scope(|s| {
        for worker in 0..WORKERS {
            let router = &router;
            s.spawn(move || hammer(router, worker));
        }
    });

    assert_eq!(router.snapshot().agents, frozen);
    // only the records advance the version
    assert_eq!(router.status().version, paused_at + WORKERS * ROUNDS);
    assert!(router.status().paused);
}

#[test]
fn test_pause_toggled_during_concurrent_routing() {
    let router = AdaptiveRouter::new();
    let start_version = router.status().version;
    let start_calls = total_calls(&router);
    let toggles = AtomicU64::new(0);
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let router = &router;
                s.spawn(move || hammer(router, worker))
            })
            .collect();

        s.spawn(|| {
            let mut flip = 0u64;
            while !done.load(Ordering::Acquire) {
                if flip % 2 == 0 {
                    router.pause();
                } else {
                    router.resume();
                }
                flip += 1;
                toggles.fetch_add(1, Ordering::Relaxed);
                std::thread::yield_now();
            }
        });

        for handle in workers {
            handle.join().expect("worker panicked");
        }
        done.store(true, Ordering::Release);
    });

    let ops = WORKERS * ROUNDS;
    let routed = total_calls(&router) - start_calls;
    assert!(routed <= ops, "{} calls counted for {} chooses", routed, ops);

    // running chooses, every record and every toggle each bump the version once
    let toggles = toggles.load(Ordering::Relaxed);
    assert_eq!(router.status().version, start_version + routed + ops + toggles);
    assert!(router.snapshot().recent.len() <= 250);
    assert_stats_bounded(&router);
}

#[test]
fn test_converges_on_reliable_agent() {
    let router = AdaptiveRouter::new();
    let mut picks: HashMap<AgentId, usize> = HashMap::new();

    for i in 0..1000 {
        let task = RouteTask::new(format!("t{}", i), "simulate").with_difficulty(0.9);
        let agent = router.choose(Some(&task));
        *picks.entry(agent).or_default() += 1;

        if agent == AgentId::Simwright {
            report(&router, &task, agent, true, 100.0);
        } else {
            report(&router, &task, agent, false, 3000.0);
        }
    }

    let sim = picks.get(&AgentId::Simwright).copied().unwrap_or(0);
    assert!(sim > 800, "sim picked {} times: {:?}", sim, picks);

    let snapshot = router.snapshot();
    let stats = &snapshot.agents[&AgentId::Simwright];
    assert!(stats.ema_success > 0.99);
    assert!(stats.ema_latency < 150.0);
    assert_eq!(snapshot.recent.len(), 250);
}

#[test]
fn test_exploration_reaches_every_agent() {
    let router = AdaptiveRouter::new();
    let mut seen = HashMap::new();
    for i in 0..40 {
        let task = RouteTask::new(format!("t{}", i), "any");
        *seen.entry(router.choose(Some(&task))).or_insert(0usize) += 1;
    }
    for agent in AgentId::ALL {
        assert!(seen.get(&agent).copied().unwrap_or(0) >= 5, "{} starved: {:?}", agent, seen);
    }
}

#[test]
fn test_pause_freezes_learning_midstream() {
    let router = AdaptiveRouter::new();
    let task = RouteTask::new("warm", "any").with_difficulty(0.5);
    for _ in 0..30 {
        let agent = router.choose(Some(&task));
        report(&router, &task, agent, agent == AgentId::Mathwright, 400.0);
    }

    router.pause();
    let frozen = router.snapshot().agents;
    let first = router.choose(Some(&task));
    for _ in 0..100 {
        assert_eq!(router.choose(Some(&task)), first);
        report(&router, &task, AgentId::EchoArchivist, true, 1.0);
    }
    assert_eq!(router.snapshot().agents, frozen);

    router.resume();
    report(&router, &task, AgentId::EchoArchivist, true, 1.0);
    assert_ne!(router.snapshot().agents, frozen);
}
