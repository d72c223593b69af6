// packages/engine/src/routing/store.rs
//! Router snapshot persistence
//!
//! The router never talks to a database itself. Hosts pick a
//! [`SnapshotStore`] at startup through `[store] backend` and either save
//! explicitly or run [`spawn_autosave`], which writes only when the router
//! version has moved since the last save.

use crate::routing::router::AdaptiveRouter;
use crate::routing::types::{AgentId, RouterSnapshot};
use crate::utils::config::{StoreBackend, StoreConfig};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Durable home for router snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &RouterSnapshot) -> Result<()>;

    /// `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<RouterSnapshot>>;
}

/// Process-local store, mostly for tests and single-process hosts
#[derive(Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<RouterSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &RouterSnapshot) -> Result<()> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<RouterSnapshot>> {
        Ok(self.slot.lock().clone())
    }
}

/// JSON file store; writes go through a sibling temp file and a rename
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &RouterSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("Failed to write snapshot: {}", e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("Failed to move snapshot: {}", e)))?;

        debug!("Snapshot v{} written to {:?}", snapshot.version, self.path);
        Ok(())
    }

    async fn load(&self) -> Result<Option<RouterSnapshot>> {
        match fs::read(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::StorageFailed(format!(
                "Failed to read snapshot: {}",
                e
            ))),
        }
    }
}

/// Build the store selected by configuration
pub fn store_from_config(config: &StoreConfig) -> Arc<dyn SnapshotStore> {
    match config.backend {
        StoreBackend::Memory => Arc::new(MemorySnapshotStore::new()),
        StoreBackend::File => Arc::new(FileSnapshotStore::new(config.path.clone())),
    }
}

/// Per-agent change between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDelta {
    pub agent: AgentId,
    pub calls_delta: i64,
    pub ema_success_delta: f64,
    pub ema_latency_delta: f64,
}

/// Comparison of a live snapshot against a persisted copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub from_version: u64,
    pub to_version: u64,
    pub changed: Vec<AgentDelta>,
    pub new_outcomes: usize,
}

impl SnapshotDiff {
    /// Diff by EMA values and call counts per agent
    pub fn between(previous: &RouterSnapshot, current: &RouterSnapshot) -> Self {
        let changed = current
            .agents
            .iter()
            .filter_map(|(agent, now)| {
                let before = previous.agents.get(agent);
                let calls_before = before.map(|s| s.calls).unwrap_or(0);
                let success_before = before.map(|s| s.ema_success).unwrap_or(0.5);
                let latency_before = before.map(|s| s.ema_latency).unwrap_or(2000.0);

                let delta = AgentDelta {
                    agent: *agent,
                    calls_delta: now.calls as i64 - calls_before as i64,
                    ema_success_delta: now.ema_success - success_before,
                    ema_latency_delta: now.ema_latency - latency_before,
                };
                let moved = before.is_none()
                    || delta.calls_delta != 0
                    || delta.ema_success_delta != 0.0
                    || delta.ema_latency_delta != 0.0;
                moved.then_some(delta)
            })
            .collect();

        let last_seen = previous.recent.last();
        let new_outcomes = match last_seen {
            Some(last) => current
                .recent
                .iter()
                .rev()
                .take_while(|o| *o != last)
                .count(),
            None => current.recent.len(),
        };

        Self {
            from_version: previous.version,
            to_version: current.version,
            changed,
            new_outcomes,
        }
    }

    /// True when the persisted copy no longer matches the live state
    pub fn is_stale(&self) -> bool {
        self.from_version != self.to_version || !self.changed.is_empty()
    }
}

/// Periodically persist router snapshots until `token` is cancelled.
///
/// A final save runs on cancellation so the last changes are not lost.
pub fn spawn_autosave(
    router: Arc<AdaptiveRouter>,
    store: Arc<dyn SnapshotStore>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Snapshot autosave every {:?}", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut saved_version = 0u64;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    save_if_changed(&router, store.as_ref(), &mut saved_version).await;
                    debug!("Snapshot autosave stopped");
                    break;
                }
                _ = interval.tick() => {
                    save_if_changed(&router, store.as_ref(), &mut saved_version).await;
                }
            }
        }
    })
}

async fn save_if_changed(router: &AdaptiveRouter, store: &dyn SnapshotStore, saved: &mut u64) {
    let snapshot = router.snapshot();
    if snapshot.version == *saved {
        return;
    }
    match store.save(&snapshot).await {
        Ok(()) => *saved = snapshot.version,
        Err(e) => warn!("Snapshot autosave failed: {}", e),
    }
}
