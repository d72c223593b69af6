// packages/engine/src/nexus/registry.rs
//! Append-only agent registry
//!
//! Agents live in an arena indexed by [`AgentIndex`]; parent and child links
//! are stored as indices rather than string pointers, so the hierarchy is a
//! plain tree of integers. Entries are never removed or replaced.
//!
//! ```text
//! index: "root" → 0, "c1" → 1, "c2" → 2
//! nodes: [0: root {children: [1, 2]}, 1: c1 {parent: 0}, 2: c2 {parent: 0}]
//! ```

use crate::utils::errors::{EngineError, Result};
use crate::utils::now_ms;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Upper bound on parent-chain walks
const MAX_LINEAGE_WALK: u32 = 100;

/// Identity of a registered agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentFingerprint {
    /// Display name, e.g. "Buildsmith"
    pub name: String,

    /// Semantic version, e.g. "1.2.0"
    pub version: String,

    /// Content hash (`sha256:<hex>`)
    pub hash: String,

    /// Lineage parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl AgentFingerprint {
    pub fn new(name: impl Into<String>, version: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            hash: hash.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// SHA-256 over the given parts, formatted as `sha256:<hex>`
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Position of an agent in the registry arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentIndex(usize);

impl AgentIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct AgentNode {
    id: String,
    fingerprint: AgentFingerprint,
    parent: Option<AgentIndex>,
    children: Vec<AgentIndex>,
    registered_at: i64,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<AgentNode>,
    index: HashMap<String, AgentIndex>,
}

impl Arena {
    fn node(&self, id: &str) -> Option<&AgentNode> {
        self.index.get(id).map(|idx| &self.nodes[idx.0])
    }
}

/// Registry entry as seen by callers
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredAgent {
    pub index: AgentIndex,
    pub id: String,
    pub fingerprint: AgentFingerprint,
    pub registered_at: i64,
}

/// Append-only map of agent id to fingerprint
#[derive(Debug, Default)]
pub struct AgentRegistry {
    arena: RwLock<Arena>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`; fails if the id is already present.
    ///
    /// When the fingerprint names a registered parent, the new agent is
    /// appended to that parent's children.
    pub fn register(&self, id: impl Into<String>, fingerprint: AgentFingerprint) -> Result<AgentIndex> {
        let id = id.into();
        let mut arena = self.arena.write();

        if arena.index.contains_key(&id) {
            return Err(EngineError::DuplicateAgent(id));
        }

        let idx = AgentIndex(arena.nodes.len());
        let parent = fingerprint
            .parent
            .as_deref()
            .and_then(|p| arena.index.get(p).copied());

        if let Some(parent) = parent {
            arena.nodes[parent.0].children.push(idx);
        }

        debug!("Registered agent {} as #{}", id, idx.0);
        arena.index.insert(id.clone(), idx);
        arena.nodes.push(AgentNode {
            id,
            fingerprint,
            parent,
            children: Vec::new(),
            registered_at: now_ms(),
        });

        Ok(idx)
    }

    pub fn has(&self, id: &str) -> bool {
        self.arena.read().index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<AgentFingerprint> {
        self.arena.read().node(id).map(|n| n.fingerprint.clone())
    }

    pub fn entry(&self, id: &str) -> Option<RegisteredAgent> {
        let arena = self.arena.read();
        let idx = *arena.index.get(id)?;
        let node = &arena.nodes[idx.0];
        Some(RegisteredAgent {
            index: idx,
            id: node.id.clone(),
            fingerprint: node.fingerprint.clone(),
            registered_at: node.registered_at,
        })
    }

    pub fn index_of(&self, id: &str) -> Option<AgentIndex> {
        self.arena.read().index.get(id).copied()
    }

    pub fn id_at(&self, idx: AgentIndex) -> Option<String> {
        self.arena.read().nodes.get(idx.0).map(|n| n.id.clone())
    }

    pub fn parent_of(&self, id: &str) -> Option<String> {
        let arena = self.arena.read();
        let parent = arena.node(id)?.parent?;
        Some(arena.nodes[parent.0].id.clone())
    }

    /// Direct children of `id`, in registration order
    pub fn children(&self, id: &str) -> Vec<String> {
        let arena = self.arena.read();
        arena
            .node(id)
            .map(|n| {
                n.children
                    .iter()
                    .map(|c| arena.nodes[c.0].id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registered descendant of `id`, depth first
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let arena = self.arena.read();
        let mut out = Vec::new();
        let mut stack: Vec<AgentIndex> = match arena.index.get(id) {
            Some(idx) => arena.nodes[idx.0].children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(idx) = stack.pop() {
            let node = &arena.nodes[idx.0];
            out.push(node.id.clone());
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Number of registered ancestors above `id`
    pub fn lineage_depth(&self, id: &str) -> Option<u32> {
        let arena = self.arena.read();
        let mut current = *arena.index.get(id)?;
        let mut depth = 0;
        while let Some(parent) = arena.nodes[current.0].parent {
            depth += 1;
            if depth >= MAX_LINEAGE_WALK {
                break;
            }
            current = parent;
        }
        Some(depth)
    }

    /// Topmost registered ancestor of `id` (itself for roots)
    pub fn lineage_root(&self, id: &str) -> Option<String> {
        let arena = self.arena.read();
        let mut current = *arena.index.get(id)?;
        let mut steps = 0;
        while let Some(parent) = arena.nodes[current.0].parent {
            current = parent;
            steps += 1;
            if steps >= MAX_LINEAGE_WALK {
                break;
            }
        }
        Some(arena.nodes[current.0].id.clone())
    }

    pub fn len(&self) -> usize {
        self.arena.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.arena.read().nodes.iter().map(|n| n.id.clone()).collect()
    }
}
