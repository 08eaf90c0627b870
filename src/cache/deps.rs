//! Which sources embed which.
//!
//! A cached render of `a.md` is only valid while nothing `a.md` embeds, directly or through
//! other documents, has changed. The resolver records every embed edge it follows; the cache
//! hashes the modification times of the transitive closure.

use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::{depth_first_search, DfsEvent},
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

use crate::host::FileProvider;

/// Missing files hash as this mtime so their reappearance changes the hash.
const ABSENT_MTIME: i64 = -1;

#[derive(Debug, Default, Clone)]
pub struct EmbedGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl EmbedGraph {
    pub fn new() -> Self {
        EmbedGraph::default()
    }

    fn node(&mut self, path: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(path) {
            return *idx;
        }
        let idx = self.graph.add_node(path.to_string());
        self.index.insert(path.to_string(), idx);
        idx
    }

    /// Record that `source` embeds `target`.
    pub fn record_embed(&mut self, source: &str, target: &str) {
        if source == target {
            return;
        }
        let from = self.node(source);
        let to = self.node(target);
        self.graph.update_edge(from, to, ());
    }

    /// Forget the outgoing edges of `source`, before re-recording them after a re-render.
    pub fn clear_embeds(&mut self, source: &str) {
        let Some(&idx) = self.index.get(source) else {
            return;
        };
        self.graph.retain_edges(|graph, edge| {
            graph
                .edge_endpoints(edge)
                .is_none_or(|(from, _)| from != idx)
        });
    }

    /// Everything `source` embeds, transitively, excluding itself.
    pub fn dependencies(&self, source: &str) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        let Some(&start) = self.index.get(source) else {
            return deps;
        };
        depth_first_search(&self.graph, Some(start), |event| {
            if let DfsEvent::Discover(idx, _) = event {
                if idx != start {
                    deps.insert(self.graph[idx].clone());
                }
            }
        });
        deps
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

/// Digest over `(path, mtime)` of each dependency, usually [`EmbedGraph::dependencies`] of a
/// source. Leaf files hash the empty set, so the value is stable for them.
pub async fn dependency_hash(deps: &BTreeSet<String>, files: &dyn FileProvider) -> String {
    let mut hasher = Sha256::new();
    for dep in deps {
        let mtime = match files.stat(dep).await {
            Ok(stat) => stat.mtime_ms,
            Err(_) => ABSENT_MTIME,
        };
        hasher.update(dep.as_bytes());
        hasher.update([0u8]);
        hasher.update(mtime.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
