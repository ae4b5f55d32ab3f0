//! Recompute/compaction engine.
//!
//! Decides, per node, whether its full embedding stays resident or is
//! evicted and recomputed from passage text at query time. Persisting only
//! the resident vectors is how a compacted index undercuts naive
//! full-vector storage; the price is an embedding-collaborator round-trip
//! per evicted candidate during search.
//!
//! Default policy is hub detection: traversal revisits high-in-degree nodes
//! constantly, so their vectors earn residency; leaf nodes are touched
//! rarely and can be recomputed on demand.

use crate::graph::Graph;
use tracing::debug;

/// Compaction policy knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPolicy {
    /// A node stays resident when its in-degree exceeds
    /// `threshold_factor ×` the mean in-degree.
    pub threshold_factor: f32,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            threshold_factor: 1.0,
        }
    }
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    /// Residency per node, indexed by ID.
    pub resident: Vec<bool>,
    pub resident_count: usize,
}

impl CompactionPlan {
    /// Plan that keeps every node resident (compaction disabled).
    #[must_use]
    pub fn all_resident(node_count: usize) -> Self {
        Self {
            resident: vec![true; node_count],
            resident_count: node_count,
        }
    }
}

/// Split the graph's nodes into resident and recompute sets.
///
/// The entry point is always resident: search descent starts there before
/// any recompute machinery is in play.
#[must_use]
pub fn plan(graph: &Graph, policy: &CompactionPolicy) -> CompactionPlan {
    let n = graph.len();
    if n == 0 {
        return CompactionPlan {
            resident: Vec::new(),
            resident_count: 0,
        };
    }

    let in_degrees = graph.in_degrees();
    let mean = in_degrees.iter().map(|&d| d as f64).sum::<f64>() / n as f64;
    let threshold = mean * policy.threshold_factor as f64;

    let mut resident: Vec<bool> = in_degrees
        .iter()
        .map(|&d| d as f64 > threshold)
        .collect();
    if let Some(entry) = graph.entry_point() {
        resident[entry as usize] = true;
    }

    let resident_count = resident.iter().filter(|&&r| r).count();
    debug!(
        nodes = n,
        resident = resident_count,
        mean_in_degree = mean,
        "compaction plan"
    );
    CompactionPlan {
        resident,
        resident_count,
    }
}
