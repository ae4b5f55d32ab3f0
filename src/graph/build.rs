//! Graph construction: one-at-a-time insertion with diversity pruning.
//!
//! Each new node runs a greedy descent from the entry point through the
//! layers above its own level, then a beam search (candidate-list size =
//! build complexity) on each layer it joins. The nearest candidates are
//! connected bidirectionally and every affected neighbor list is pruned
//! back under the degree cap with a relative-neighborhood rule: a candidate
//! is kept only if no already-kept neighbor is closer to it than the
//! candidate is to the node. That rule suppresses clustered, redundant
//! edges and keeps the graph navigable.
//!
//! Incremental append reuses the same insertion procedure against the
//! existing graph, so pre-existing nodes change only where a new reverse
//! edge forces a prune — nothing is re-linked wholesale.

use crate::distance::DistanceMetric;
use crate::embedding::{EmbeddingSource, VectorSlab};
use crate::error::Result;
use crate::graph::search::search_layer;
use crate::graph::{Graph, GraphParams};
use tracing::info;

/// How often build progress is reported.
const PROGRESS_INTERVAL: usize = 1000;

/// Build-time vector source: every vector is resident in the slab.
struct SlabSource<'a> {
    slab: &'a VectorSlab,
}

impl EmbeddingSource for SlabSource<'_> {
    fn resolve(&mut self, id: u32) -> Option<&[f32]> {
        if (id as usize) < self.slab.len() {
            Some(self.slab.get(id as usize))
        } else {
            None
        }
    }
}

/// Build a graph over all vectors in the slab.
///
/// An empty slab yields an empty-but-valid graph.
pub fn build(slab: &VectorSlab, metric: DistanceMetric, params: &GraphParams) -> Result<Graph> {
    let mut graph = Graph::new(params.degree as u32, params.max_degree0 as u32);
    extend(&mut graph, slab, metric, params, 0)?;
    Ok(graph)
}

/// Insert vectors `start..slab.len()` into an existing graph.
///
/// The caller guarantees the first `start` slab entries are the vectors the
/// graph was built over (same model, dimension, metric — enforced at the
/// manifest level).
pub fn extend(
    graph: &mut Graph,
    slab: &VectorSlab,
    metric: DistanceMetric,
    params: &GraphParams,
    start: usize,
) -> Result<()> {
    let total = slab.len();
    for id in start..total {
        insert(graph, slab, metric, id as u32, params)?;
        let inserted = id - start + 1;
        if inserted % PROGRESS_INTERVAL == 0 {
            info!(inserted, total = total - start, "graph build progress");
        }
    }
    graph.validate()?;
    Ok(())
}

/// Insert one node into the graph.
fn insert(
    graph: &mut Graph,
    slab: &VectorSlab,
    metric: DistanceMetric,
    id: u32,
    params: &GraphParams,
) -> Result<()> {
    let level = params.assign_level(id);
    let prev_entry = graph.entry_point();
    let prev_top = graph.top_level();
    graph.push_node(id, level)?;

    // First node: it is the entry point, nothing to link.
    let (Some(entry), Some(prev_top)) = (prev_entry, prev_top) else {
        return Ok(());
    };
    let prev_top = prev_top as usize;
    let node_level = level as usize;

    let query = slab.get(id as usize);
    let mut source = SlabSource { slab };
    let mut current = entry;

    // Greedy descent through the layers above this node's level: refine the
    // entry point only, no edges added.
    for layer in ((node_level + 1)..=prev_top).rev() {
        let best = search_layer(graph, layer, &[current], query, metric, 1, &mut source);
        if let Some(&(best_id, _)) = best.first() {
            current = best_id;
        }
    }

    // Beam-search and connect on each layer this node joins.
    for layer in (0..=node_level.min(prev_top)).rev() {
        let candidates = search_layer(
            graph,
            layer,
            &[current],
            query,
            metric,
            params.build_complexity,
            &mut source,
        );
        if let Some(&(best_id, _)) = candidates.first() {
            current = best_id;
        }

        let selected = select_diverse(&candidates, params.degree, slab, metric, Some(id));
        let cap = params.max_degree(layer);

        for &neighbor in &selected {
            link(graph, layer, id, neighbor);
            link(graph, layer, neighbor, id);
        }

        if graph.neighbors(layer, id).len() > cap {
            prune(graph, layer, id, cap, slab, metric);
        }
        for &neighbor in &selected {
            if graph.neighbors(layer, neighbor).len() > cap {
                prune(graph, layer, neighbor, cap, slab, metric);
            }
        }
    }

    if node_level > prev_top {
        graph.set_entry_point(id);
    }
    Ok(())
}

/// Add a directed edge, skipping duplicates and self-loops.
fn link(graph: &mut Graph, layer: usize, from: u32, to: u32) {
    if from == to {
        return;
    }
    let list = graph.neighbors_mut(layer, from);
    if !list.contains(&to) {
        list.push(to);
    }
}

/// Relative-neighborhood selection over distance-sorted candidates.
///
/// A candidate joins the selection only if it is closer to the node than to
/// every already-selected neighbor. If the rule leaves slots open, the
/// nearest remaining candidates fill them.
fn select_diverse(
    candidates: &[(u32, f32)],
    m: usize,
    slab: &VectorSlab,
    metric: DistanceMetric,
    exclude: Option<u32>,
) -> Vec<u32> {
    let mut selected: Vec<u32> = Vec::with_capacity(m.min(candidates.len()));

    for &(candidate, dist_to_node) in candidates {
        if selected.len() >= m {
            break;
        }
        if Some(candidate) == exclude {
            continue;
        }
        let candidate_vec = slab.get(candidate as usize);
        let diverse = selected.iter().all(|&kept| {
            dist_to_node < metric.distance(slab.get(kept as usize), candidate_vec)
        });
        if diverse {
            selected.push(candidate);
        }
    }

    // Fill remaining slots with the closest candidates the rule rejected.
    if selected.len() < m {
        for &(candidate, _) in candidates {
            if selected.len() >= m {
                break;
            }
            if Some(candidate) == exclude || selected.contains(&candidate) {
                continue;
            }
            selected.push(candidate);
        }
    }

    selected
}

/// Prune a neighbor list back under `cap` using the same diversity rule the
/// forward selection uses.
fn prune(
    graph: &mut Graph,
    layer: usize,
    node: u32,
    cap: usize,
    slab: &VectorSlab,
    metric: DistanceMetric,
) {
    let node_vec = slab.get(node as usize);
    let mut candidates: Vec<(u32, f32)> = graph
        .neighbors(layer, node)
        .iter()
        .map(|&nbr| (nbr, metric.distance(node_vec, slab.get(nbr as usize))))
        .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let kept = select_diverse(&candidates, cap, slab, metric, Some(node));
    let list = graph.neighbors_mut(layer, node);
    list.clear();
    list.extend(kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingStore, ResidentSource};
    use crate::graph::search::beam_search;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_slab(n: usize, dim: usize, seed: u64) -> VectorSlab {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut slab = VectorSlab::new(dim);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
            slab.push(&crate::simd::normalize(&v)).unwrap();
        }
        slab
    }

    #[test]
    fn empty_build_yields_valid_empty_graph() {
        let slab = VectorSlab::new(4);
        let graph = build(&slab, DistanceMetric::Cosine, &GraphParams::default()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.entry_point(), None);
        graph.validate().unwrap();
    }

    #[test]
    fn degree_bounds_hold_after_build() {
        let params = GraphParams::new(8, 32);
        let slab = random_slab(200, 16, 7);
        let graph = build(&slab, DistanceMetric::Cosine, &params).unwrap();
        graph.validate().unwrap();
        for layer in 0..graph.layer_count() {
            let cap = params.max_degree(layer);
            for id in 0..graph.len() as u32 {
                assert!(graph.neighbors(layer, id).len() <= cap);
                assert!(!graph.neighbors(layer, id).contains(&id));
            }
        }
    }

    #[test]
    fn search_finds_inserted_vector() {
        let params = GraphParams::new(8, 32);
        let slab = random_slab(150, 16, 11);
        let graph = build(&slab, DistanceMetric::Cosine, &params).unwrap();
        let store = EmbeddingStore::full(slab.clone());
        let mut source = ResidentSource::new(&store);

        for probe in [0usize, 42, 149] {
            let results = beam_search(
                &graph,
                slab.get(probe),
                DistanceMetric::Cosine,
                32,
                &mut source,
            );
            assert_eq!(results[0].0 as usize, probe, "self-search missed");
        }
    }

    #[test]
    fn extend_matches_fresh_build_retrievability() {
        let params = GraphParams::new(8, 64);
        let full = random_slab(120, 16, 3);

        // Fresh build over everything.
        let fresh = build(&full, DistanceMetric::Cosine, &params).unwrap();

        // Build over the first half, then extend with the second.
        let mut half = VectorSlab::new(16);
        for i in 0..60 {
            half.push(full.get(i)).unwrap();
        }
        let mut grown = build(&half, DistanceMetric::Cosine, &params).unwrap();
        extend(&mut grown, &full, DistanceMetric::Cosine, &params, 60).unwrap();

        assert_eq!(grown.len(), fresh.len());

        let store = EmbeddingStore::full(full.clone());
        let mut overlap = 0usize;
        let mut total = 0usize;
        for probe in (0..120).step_by(10) {
            let query = full.get(probe);
            let mut s1 = ResidentSource::new(&store);
            let mut s2 = ResidentSource::new(&store);
            let a: Vec<u32> = beam_search(&fresh, query, DistanceMetric::Cosine, 32, &mut s1)
                .into_iter()
                .take(10)
                .map(|r| r.0)
                .collect();
            let b: Vec<u32> = beam_search(&grown, query, DistanceMetric::Cosine, 32, &mut s2)
                .into_iter()
                .take(10)
                .map(|r| r.0)
                .collect();
            total += a.len();
            overlap += a.iter().filter(|&&id| b.contains(&id)).count();
        }
        let ratio = overlap as f64 / total as f64;
        assert!(ratio >= 0.9, "append/rebuild overlap {ratio:.2} below 0.9");
    }
}
