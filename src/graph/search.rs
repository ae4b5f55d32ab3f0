//! Greedy beam search over the graph.
//!
//! Standard best-first traversal: a min-heap of candidates to explore and a
//! bounded max-heap of the best results found, stopping when the closest
//! unexplored candidate cannot improve the worst kept result. The
//! candidate-list size `ef` is the recall/latency knob — the search-time
//! "complexity" parameter and the build-time `ef_construction` both land
//! here.
//!
//! Vectors are resolved through [`EmbeddingSource`], so the same traversal
//! serves fully resident indexes and compacted ones that recompute evicted
//! vectors mid-search. A node whose vector cannot be resolved is skipped,
//! never fatal.

use crate::distance::DistanceMetric;
use crate::embedding::EmbeddingSource;
use crate::graph::Graph;
use std::collections::{BinaryHeap, HashSet};

/// Candidate ordered for a min-heap: closest first, ties to the lower ID.
#[derive(PartialEq)]
struct MinCandidate {
    id: u32,
    distance: f32,
}

impl Eq for MinCandidate {}

impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result ordered for a max-heap: worst kept result on top, ties evict the
/// higher ID first.
#[derive(PartialEq)]
struct MaxResult {
    id: u32,
    distance: f32,
}

impl Eq for MaxResult {}

impl Ord for MaxResult {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MaxResult {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search within a single layer.
///
/// Returns up to `ef` nodes sorted by ascending distance (ties by ascending
/// ID). Entry nodes that fail to resolve are dropped; if none resolve the
/// result is empty.
pub fn search_layer(
    graph: &Graph,
    layer: usize,
    entries: &[u32],
    query: &[f32],
    metric: DistanceMetric,
    ef: usize,
    source: &mut dyn EmbeddingSource,
) -> Vec<(u32, f32)> {
    let ef = ef.max(1);
    let mut candidates: BinaryHeap<MinCandidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<MaxResult> = BinaryHeap::with_capacity(ef + 1);
    let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 2);

    source.prefetch(entries);
    for &entry in entries {
        if !visited.insert(entry) {
            continue;
        }
        match source.resolve(entry) {
            Some(v) => {
                let distance = metric.distance(query, v);
                candidates.push(MinCandidate {
                    id: entry,
                    distance,
                });
                results.push(MaxResult {
                    id: entry,
                    distance,
                });
            }
            // Unavailable vector: still traversable, never a result.
            None => candidates.push(MinCandidate {
                id: entry,
                distance: f32::MAX,
            }),
        }
    }

    while let Some(candidate) = candidates.pop() {
        let worst = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
        if candidate.distance > worst && results.len() >= ef {
            break;
        }

        let neighbors = graph.neighbors(layer, candidate.id);
        source.prefetch(neighbors);
        for &neighbor in neighbors {
            if !visited.insert(neighbor) {
                continue;
            }
            let distance = match source.resolve(neighbor) {
                Some(v) => metric.distance(query, v),
                None => {
                    // Traverse through the node at its parent's distance so a
                    // single unavailable vector cannot sever the graph, but
                    // keep it out of the result heap.
                    candidates.push(MinCandidate {
                        id: neighbor,
                        distance: candidate.distance,
                    });
                    continue;
                }
            };
            let worst = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
            if results.len() < ef || distance < worst {
                candidates.push(MinCandidate {
                    id: neighbor,
                    distance,
                });
                results.push(MaxResult {
                    id: neighbor,
                    distance,
                });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut output: Vec<(u32, f32)> = results.into_iter().map(|r| (r.id, r.distance)).collect();
    output.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    output
}

/// Full search: greedy descent through the upper layers, then a beam of
/// width `ef` on the bottom layer.
///
/// Returns up to `ef` candidates sorted by ascending distance. An empty
/// graph yields an empty result, not an error.
pub fn beam_search(
    graph: &Graph,
    query: &[f32],
    metric: DistanceMetric,
    ef: usize,
    source: &mut dyn EmbeddingSource,
) -> Vec<(u32, f32)> {
    let Some(entry) = graph.entry_point() else {
        return Vec::new();
    };
    let Some(top) = graph.top_level() else {
        return Vec::new();
    };

    let mut current = entry;
    for layer in (1..=top as usize).rev() {
        let best = search_layer(graph, layer, &[current], query, metric, 1, source);
        if let Some(&(id, _)) = best.first() {
            current = id;
        }
    }

    search_layer(graph, 0, &[current], query, metric, ef, source)
}
