//! Dependency manifest and staleness tracking.
//!
//! The manifest is the durable form of the staleness graph: a flat list of
//! `child -> parent` edges plus the set of stale artifact ids, serialized as
//! JSON per branch. [`StalenessTracker`] is the in-memory view built from it;
//! every mutation is written back through the manifest so the graph is fully
//! reconstructable from the file alone after a crash.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use hookline_types::ArtifactId;

/// One recorded dependency: `child` was built from `parent`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub child: ArtifactId,
    pub parent: ArtifactId,
}

/// Serialized per-branch dependency graph and staleness flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub edges: Vec<DependencyEdge>,
    pub stale: Vec<ArtifactId>,
    /// Every artifact id ever recorded for this branch, including edge
    /// endpoints. "Missing" in readiness terms means absent from this set.
    pub nodes: Vec<ArtifactId>,
}

/// In-memory staleness graph over a branch's artifacts.
///
/// Invalidation is transitive closure over recorded edges, and exact-match:
/// invalidating one unit's script never reaches a sibling unit's subtree
/// because no edge connects them.
#[derive(Debug, Clone, Default)]
pub struct StalenessTracker {
    /// child -> parents
    parents: BTreeMap<ArtifactId, BTreeSet<ArtifactId>>,
    /// parent -> children
    children: BTreeMap<ArtifactId, BTreeSet<ArtifactId>>,
    stale: BTreeSet<ArtifactId>,
    nodes: BTreeSet<ArtifactId>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the tracker from a persisted manifest.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut tracker = Self::new();
        for id in &manifest.nodes {
            tracker.nodes.insert(id.clone());
        }
        for edge in &manifest.edges {
            tracker.insert_edge(edge.child.clone(), edge.parent.clone());
        }
        for id in &manifest.stale {
            tracker.stale.insert(id.clone());
        }
        tracker
    }

    /// Serialize the current graph back into manifest form.
    pub fn to_manifest(&self) -> Manifest {
        let mut edges: Vec<DependencyEdge> = self
            .parents
            .iter()
            .flat_map(|(child, parents)| {
                parents.iter().map(|parent| DependencyEdge {
                    child: child.clone(),
                    parent: parent.clone(),
                })
            })
            .collect();
        edges.sort();
        Manifest {
            edges,
            stale: self.stale.iter().cloned().collect(),
            nodes: self.nodes.iter().cloned().collect(),
        }
    }

    fn insert_edge(&mut self, child: ArtifactId, parent: ArtifactId) {
        self.nodes.insert(child.clone());
        self.nodes.insert(parent.clone());
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.children.entry(parent).or_default().insert(child);
    }

    /// Record that `child` exists and was built from `parent`.
    pub fn record_dependency(&mut self, child: ArtifactId, parent: ArtifactId) {
        self.insert_edge(child, parent);
    }

    /// Record an artifact with no recorded parent (the foundation, or a
    /// branch-level root).
    pub fn record_node(&mut self, id: ArtifactId) {
        self.nodes.insert(id);
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.nodes.contains(id)
    }

    pub fn is_stale(&self, id: &ArtifactId) -> bool {
        self.stale.contains(id)
    }

    /// Mark `id` and every transitive descendant stale. Returns the ids that
    /// changed state, in BFS order starting at `id`.
    pub fn invalidate(&mut self, id: &ArtifactId) -> Vec<ArtifactId> {
        let mut newly_stale = Vec::new();
        let mut queue = VecDeque::from([id.clone()]);
        let mut seen = BTreeSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if self.stale.insert(current.clone()) {
                newly_stale.push(current.clone());
            }
            if let Some(children) = self.children.get(&current) {
                queue.extend(children.iter().cloned());
            }
        }
        newly_stale
    }

    /// Clear the stale flag on `id` alone (after regeneration). Descendants
    /// stay stale until regenerated themselves.
    pub fn clear_stale(&mut self, id: &ArtifactId) {
        self.stale.remove(id);
    }

    /// An artifact is ready when it is recorded, not stale, and every
    /// recorded ancestor is ready too.
    pub fn is_ready(&self, id: &ArtifactId) -> bool {
        if !self.nodes.contains(id) || self.stale.contains(id) {
            return false;
        }
        let mut queue: VecDeque<ArtifactId> =
            self.parents.get(id).into_iter().flatten().cloned().collect();
        let mut seen = BTreeSet::new();
        while let Some(ancestor) = queue.pop_front() {
            if !seen.insert(ancestor.clone()) {
                continue;
            }
            if !self.nodes.contains(&ancestor) || self.stale.contains(&ancestor) {
                return false;
            }
            queue.extend(self.parents.get(&ancestor).into_iter().flatten().cloned());
        }
        true
    }

    /// Transitive descendants of `id`, excluding `id` itself.
    pub fn descendants(&self, id: &ArtifactId) -> Vec<ArtifactId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<ArtifactId> =
            self.children.get(id).into_iter().flatten().cloned().collect();
        let mut seen = BTreeSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            queue.extend(self.children.get(&current).into_iter().flatten().cloned());
            out.push(current);
        }
        out
    }

    /// All currently stale ids.
    pub fn stale_ids(&self) -> Vec<ArtifactId> {
        self.stale.iter().cloned().collect()
    }

    /// All recorded ids that currently read ready. This is the completed set
    /// a reconnecting observer needs alongside `stale_ids`.
    pub fn ready_ids(&self) -> Vec<ArtifactId> {
        self.nodes
            .iter()
            .filter(|id| self.is_ready(id))
            .cloned()
            .collect()
    }
}
