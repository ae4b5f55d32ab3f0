//! Multi-layer navigable proximity graph.
//!
//! Structure follows the HNSW construction: sparse upper layers for fast
//! long-range navigation, a dense bottom layer for precise search. Every
//! layer holds one (possibly empty) neighbor list per node; a node
//! participates in layers `0..=levels[node]`.
//!
//! The graph owns adjacency only. Vectors live in the embedding store and
//! passages in the log, all keyed by the same contiguous ID space.

pub mod build;
pub mod search;

use crate::error::{IndexError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

/// Hard cap on layer levels; the geometric draw exceeds this with
/// vanishing probability for any practical M.
pub const MAX_LEVEL: u8 = 15;

/// Per-node neighbor list. Sixteen inline slots cover typical upper-layer
/// degrees without allocation.
pub type NeighborList = SmallVec<[u32; 16]>;

/// Construction parameters for the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphParams {
    /// Max neighbors per node on upper layers (M).
    pub degree: usize,
    /// Max neighbors on the bottom layer (conventionally 2M).
    pub max_degree0: usize,
    /// Candidate-list size during construction (ef_construction).
    pub build_complexity: usize,
    /// Seed for the per-node level draw. Fixed per index so an incremental
    /// append assigns the same levels a full rebuild would.
    pub level_seed: u64,
}

impl GraphParams {
    /// Params from the manifest-visible knobs; bottom-layer cap derived.
    #[must_use]
    pub fn new(degree: usize, build_complexity: usize) -> Self {
        Self {
            degree: degree.max(2),
            max_degree0: degree.max(2) * 2,
            build_complexity: build_complexity.max(degree.max(2)),
            level_seed: 0x6e65_6172_6c69_6e65, // stable across builds
        }
    }

    /// Neighbor-list cap for a layer.
    #[must_use]
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_degree0
        } else {
            self.degree
        }
    }

    /// Geometric level draw for a node, seeded by its ID so the assignment
    /// is a pure function of (seed, id).
    #[must_use]
    pub fn assign_level(&self, id: u32) -> u8 {
        let mut rng =
            StdRng::seed_from_u64(self.level_seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let u: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
        let factor = 1.0 / (self.degree as f64).ln();
        ((-u.ln() * factor) as usize).min(MAX_LEVEL as usize) as u8
    }
}

impl Default for GraphParams {
    fn default() -> Self {
        Self::new(32, 64)
    }
}

/// The navigable graph: per-layer adjacency plus entry point.
#[derive(Debug, Clone)]
pub struct Graph {
    /// `layers[l][node]` — neighbor list of `node` on layer `l`. Every
    /// layer is sized to the node count; nodes above their level keep an
    /// empty list.
    layers: Vec<Vec<NeighborList>>,
    /// Top layer of each node.
    levels: Vec<u8>,
    /// Entry node for search descent (highest-level node).
    entry_point: Option<u32>,
    degree: u32,
    max_degree0: u32,
}

impl Graph {
    /// Empty graph with the given degree bounds.
    #[must_use]
    pub fn new(degree: u32, max_degree0: u32) -> Self {
        Self {
            layers: Vec::new(),
            levels: Vec::new(),
            entry_point: None,
            degree,
            max_degree0,
        }
    }

    /// Reassemble a graph from persisted parts, validating invariants.
    pub fn from_parts(
        layers: Vec<Vec<NeighborList>>,
        levels: Vec<u8>,
        entry_point: Option<u32>,
        degree: u32,
        max_degree0: u32,
    ) -> Result<Self> {
        let graph = Self {
            layers,
            levels,
            entry_point,
            degree,
            max_degree0,
        };
        graph.validate()?;
        Ok(graph)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn degree(&self) -> u32 {
        self.degree
    }

    #[must_use]
    pub fn max_degree0(&self) -> u32 {
        self.max_degree0
    }

    /// Highest populated layer, or `None` for an empty graph.
    #[must_use]
    pub fn top_level(&self) -> Option<u8> {
        if self.layers.is_empty() {
            None
        } else {
            Some((self.layers.len() - 1) as u8)
        }
    }

    #[must_use]
    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    #[must_use]
    pub fn level_of(&self, id: u32) -> u8 {
        self.levels[id as usize]
    }

    #[must_use]
    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Neighbors of `id` on `layer`.
    #[must_use]
    pub fn neighbors(&self, layer: usize, id: u32) -> &[u32] {
        &self.layers[layer][id as usize]
    }

    pub(crate) fn neighbors_mut(&mut self, layer: usize, id: u32) -> &mut NeighborList {
        &mut self.layers[layer][id as usize]
    }

    pub(crate) fn layer(&self, layer: usize) -> &[NeighborList] {
        &self.layers[layer]
    }

    /// Register a new node with the given level, growing layers as needed.
    /// Nodes must arrive in ID order (the store allocates contiguously).
    pub(crate) fn push_node(&mut self, id: u32, level: u8) -> Result<()> {
        if id as usize != self.levels.len() {
            return Err(IndexError::GraphInvariant(format!(
                "node {} inserted out of order (graph holds {})",
                id,
                self.levels.len()
            )));
        }
        self.levels.push(level);
        let node_count = self.levels.len();
        // Grow existing layers to the new node count.
        for layer in &mut self.layers {
            layer.resize_with(node_count, NeighborList::new);
        }
        // Add layers this node reaches above the current top.
        while self.layers.len() <= level as usize {
            self.layers.push(vec![NeighborList::new(); node_count]);
        }
        if self.entry_point.is_none() {
            self.entry_point = Some(id);
        }
        Ok(())
    }

    pub(crate) fn set_entry_point(&mut self, id: u32) {
        self.entry_point = Some(id);
    }

    /// Total directed edges across all layers.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(SmallVec::len).sum::<usize>())
            .sum()
    }

    /// In-degree of every node across all layers: how many neighbor lists
    /// reference it. Hub detection during compaction keys off this.
    #[must_use]
    pub fn in_degrees(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.len()];
        for layer in &self.layers {
            for list in layer {
                for &nbr in list {
                    counts[nbr as usize] += 1;
                }
            }
        }
        counts
    }

    /// Approximate adjacency memory, for stats.
    #[must_use]
    pub fn adjacency_bytes(&self) -> usize {
        self.edge_count() * std::mem::size_of::<u32>()
    }

    /// Check structural invariants: consistent layer sizes, neighbor IDs in
    /// range, no self-loops, degree bounds, entry point present iff
    /// non-empty. Violations are build bugs, not runtime conditions.
    pub fn validate(&self) -> Result<()> {
        let n = self.levels.len();
        if n == 0 {
            if self.entry_point.is_some() || !self.layers.is_empty() {
                return Err(IndexError::GraphInvariant(
                    "empty graph with entry point or layers".to_string(),
                ));
            }
            return Ok(());
        }
        let Some(entry) = self.entry_point else {
            return Err(IndexError::GraphInvariant(
                "non-empty graph without an entry point".to_string(),
            ));
        };
        if entry as usize >= n {
            return Err(IndexError::GraphInvariant(format!(
                "entry point {entry} out of range for {n} nodes"
            )));
        }
        for (l, layer) in self.layers.iter().enumerate() {
            if layer.len() != n {
                return Err(IndexError::GraphInvariant(format!(
                    "layer {l} holds {} lists for {n} nodes",
                    layer.len()
                )));
            }
            let cap = if l == 0 {
                self.max_degree0 as usize
            } else {
                self.degree as usize
            };
            for (id, list) in layer.iter().enumerate() {
                if list.len() > cap {
                    return Err(IndexError::GraphInvariant(format!(
                        "node {id} has {} neighbors on layer {l} (cap {cap})",
                        list.len()
                    )));
                }
                for &nbr in list {
                    if nbr as usize >= n {
                        return Err(IndexError::GraphInvariant(format!(
                            "node {id} references missing node {nbr} on layer {l}"
                        )));
                    }
                    if nbr as usize == id {
                        return Err(IndexError::GraphInvariant(format!(
                            "node {id} has a self-loop on layer {l}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_draw_is_deterministic_per_id() {
        let params = GraphParams::new(16, 64);
        for id in 0..100u32 {
            assert_eq!(params.assign_level(id), params.assign_level(id));
        }
    }

    #[test]
    fn level_draw_is_mostly_zero() {
        let params = GraphParams::new(16, 64);
        let zeros = (0..1000u32)
            .filter(|&id| params.assign_level(id) == 0)
            .count();
        // With M=16, P(level=0) ≈ 1 - 1/16.
        assert!(zeros > 850, "only {zeros} of 1000 nodes at level 0");
    }

    #[test]
    fn push_node_grows_layers() {
        let mut g = Graph::new(4, 8);
        g.push_node(0, 0).unwrap();
        g.push_node(1, 2).unwrap();
        assert_eq!(g.layer_count(), 3);
        assert_eq!(g.layer(2).len(), 2);
        assert_eq!(g.entry_point(), Some(0));
    }

    #[test]
    fn out_of_order_push_is_rejected() {
        let mut g = Graph::new(4, 8);
        let err = g.push_node(3, 0).unwrap_err();
        assert!(matches!(err, IndexError::GraphInvariant(_)));
    }

    #[test]
    fn validate_catches_dangling_neighbor() {
        let mut g = Graph::new(4, 8);
        g.push_node(0, 0).unwrap();
        g.push_node(1, 0).unwrap();
        g.neighbors_mut(0, 0).push(7);
        assert!(matches!(
            g.validate(),
            Err(IndexError::GraphInvariant(_))
        ));
    }

    #[test]
    fn in_degrees_count_reverse_references() {
        let mut g = Graph::new(4, 8);
        g.push_node(0, 0).unwrap();
        g.push_node(1, 0).unwrap();
        g.push_node(2, 0).unwrap();
        g.neighbors_mut(0, 0).push(2);
        g.neighbors_mut(0, 1).push(2);
        assert_eq!(g.in_degrees(), vec![0, 0, 2]);
    }
}
