//! Index searcher: load once, serve many read-only queries.
//!
//! The searcher loads the manifest, blob, and passage log into memory at
//! open time and never mutates them; searches borrow `&self`, so a single
//! searcher can serve concurrently dispatched queries from parallel worker
//! threads. The only external calls during a search are embedding requests:
//! the query itself, plus on-demand recomputes for nodes the compaction
//! pass evicted.

use crate::bm25::{Bm25Scorer, KeywordScorer};
use crate::distance::DistanceMetric;
use crate::embedding::{embed_in_batches, Embedder, EmbeddingStore, RecomputeSource};
use crate::error::{IndexError, Result};
use crate::format::read_blob;
use crate::graph::search::beam_search;
use crate::graph::Graph;
use crate::manifest::{IndexPaths, Manifest};
use crate::metadata::{MetadataFilter, MetadataMap};
use crate::passages::{read_all, Passage};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Per-query knobs.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Results to return.
    pub top_k: usize,
    /// Candidate-list size for the beam search; larger means higher recall
    /// and more latency. Also the over-fetch pool that metadata filters
    /// draw down — callers needing N filtered results should raise it.
    pub complexity: usize,
    /// Hybrid weight: 1.0 = pure vector, 0.0 = pure keyword.
    pub gemma: f32,
    /// Metadata filter, ANDed conditions, applied post-ranking.
    pub filter: Option<MetadataFilter>,
    /// Batch size for recompute embedding calls.
    pub embed_batch_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            complexity: 32,
            gemma: 1.0,
            filter: None,
            embed_batch_size: 32,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: u64,
    pub score: f32,
    pub text: String,
    pub metadata: MetadataMap,
}

/// Counters describing what one search did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchDiagnostics {
    /// Candidates surfaced by the beam before filtering.
    pub candidates: usize,
    /// Vectors recomputed through the embedding collaborator.
    pub recomputed: usize,
    /// Candidates dropped because their recompute failed.
    pub embedding_failures: usize,
    /// Candidates removed by the metadata filter.
    pub filtered_out: usize,
}

/// Size and shape of a loaded index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub total_passages: u64,
    pub resident_embeddings: usize,
    pub resident_bytes: usize,
    pub graph_edges: usize,
    pub graph_layers: usize,
    pub is_compact: bool,
}

/// A loaded, immutable index ready to serve queries.
pub struct IndexSearcher {
    manifest: Manifest,
    graph: Graph,
    store: EmbeddingStore,
    passages: Vec<Passage>,
    embedder: Arc<dyn Embedder>,
    keyword: Box<dyn KeywordScorer>,
}

impl std::fmt::Debug for IndexSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSearcher")
            .field("passages", &self.passages.len())
            .finish_non_exhaustive()
    }
}

impl IndexSearcher {
    /// Load the index at `index_path`, checking the embedder against the
    /// manifest before any data is touched.
    pub fn open(index_path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let paths = IndexPaths::for_index(index_path);
        let manifest = Manifest::load(&paths.meta)?;
        manifest.ensure_embedder(embedder.model_name(), embedder.dimension())?;

        let (graph, store, blob_metric) = read_blob(&paths.blob)?;
        if blob_metric != manifest.metric {
            return Err(IndexError::Format(format!(
                "blob metric {} disagrees with manifest metric {}",
                blob_metric.name(),
                manifest.metric.name()
            )));
        }

        let passages = read_all(&paths.passages)?;
        if passages.len() < graph.len() {
            return Err(IndexError::GraphInvariant(format!(
                "graph references {} nodes but passage log holds {}",
                graph.len(),
                passages.len()
            )));
        }
        if passages.len() > graph.len() {
            // A crashed append can leave passages the blob never indexed;
            // they are unreachable but harmless.
            warn!(
                indexed = graph.len(),
                logged = passages.len(),
                "passage log runs ahead of the graph"
            );
        }

        Ok(Self {
            manifest,
            graph,
            store,
            passages,
            embedder,
            keyword: Box::new(Bm25Scorer::default()),
        })
    }

    /// Swap in a different keyword-scoring collaborator.
    #[must_use]
    pub fn with_keyword_scorer(mut self, scorer: Box<dyn KeywordScorer>) -> Self {
        self.keyword = scorer;
        self
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_passages: self.manifest.total_passages,
            resident_embeddings: self.store.resident_count(),
            resident_bytes: self.store.resident_bytes(),
            graph_edges: self.graph.edge_count(),
            graph_layers: self.graph.layer_count(),
            is_compact: self.manifest.is_compact,
        }
    }

    /// Pre-touch graph adjacency and the resident vector slab so the first
    /// real query does not pay the cold-page cost. Returns elapsed seconds.
    pub fn warmup(&self) -> f64 {
        let start = Instant::now();
        let mut checksum = 0u64;
        for layer in 0..self.graph.layer_count() {
            for id in 0..self.graph.len() as u32 {
                for &nbr in self.graph.neighbors(layer, id) {
                    checksum = checksum.wrapping_add(nbr as u64);
                }
            }
        }
        let mut acc = 0.0f32;
        for id in 0..self.store.len() as u32 {
            if let Some(v) = self.store.get(id) {
                acc += v.iter().sum::<f32>();
            }
        }
        std::hint::black_box((checksum, acc));
        start.elapsed().as_secs_f64()
    }

    /// Run a query. See [`SearchOptions`] for the knobs.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.search_with_diagnostics(query, options)
            .map(|(results, _)| results)
    }

    /// Run a query and report what the search did.
    pub fn search_with_diagnostics(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<(Vec<SearchResult>, SearchDiagnostics)> {
        if !(0.0..=1.0).contains(&options.gemma) {
            return Err(IndexError::InvalidParameter(format!(
                "gemma {} outside [0, 1]",
                options.gemma
            )));
        }
        if options.top_k == 0 {
            return Ok((Vec::new(), SearchDiagnostics::default()));
        }
        if self.graph.is_empty() {
            return Ok((Vec::new(), SearchDiagnostics::default()));
        }

        let embedded = embed_in_batches(&*self.embedder, &[query], 1)?;
        let Some(query_vec) = embedded.into_iter().next().flatten() else {
            return Err(IndexError::EmbeddingUnavailable { failed: 1 });
        };

        let ef = options.complexity.max(options.top_k);
        let mut source = RecomputeSource::new(
            &self.store,
            &self.passages,
            &*self.embedder,
            options.embed_batch_size,
        );
        let candidates = beam_search(
            &self.graph,
            &query_vec,
            self.manifest.metric,
            ef,
            &mut source,
        );
        // Individual recompute failures degrade only their candidates; the
        // collaborator failing every request it got is fatal to the call.
        if source.failures() > 0 && source.recomputed() == 0 {
            return Err(IndexError::EmbeddingUnavailable {
                failed: source.failures(),
            });
        }
        let mut diagnostics = SearchDiagnostics {
            candidates: candidates.len(),
            recomputed: source.recomputed(),
            embedding_failures: source.failures(),
            filtered_out: 0,
        };

        let scored = self.score_candidates(query, &candidates, options.gemma);

        let mut results: Vec<SearchResult> = Vec::with_capacity(options.top_k);
        for (id, score) in scored {
            let passage = &self.passages[id as usize];
            if let Some(filter) = &options.filter {
                if !filter.matches(&passage.metadata) {
                    diagnostics.filtered_out += 1;
                    continue;
                }
            }
            results.push(SearchResult {
                id: passage.id,
                score,
                text: passage.text.clone(),
                metadata: passage.metadata.clone(),
            });
            if results.len() >= options.top_k {
                break;
            }
        }

        debug!(
            query_len = query.len(),
            candidates = diagnostics.candidates,
            recomputed = diagnostics.recomputed,
            returned = results.len(),
            "search complete"
        );
        Ok((results, diagnostics))
    }

    /// Turn beam distances into final scores, descending, ties by ID.
    ///
    /// Pure vector (`gemma = 1.0`) returns the metric's raw similarity.
    /// Hybrid runs fuse min-max-normalized vector and keyword legs:
    /// `gemma · vector + (1 − gemma) · keyword`.
    fn score_candidates(&self, query: &str, candidates: &[(u32, f32)], gemma: f32) -> Vec<(u32, f32)> {
        let metric = self.manifest.metric;
        let mut scored: Vec<(u32, f32)> = if gemma >= 1.0 {
            candidates
                .iter()
                .map(|&(id, dist)| (id, metric.similarity(dist)))
                .collect()
        } else {
            let vector_leg = normalize_scores(
                &candidates
                    .iter()
                    .map(|&(_, dist)| metric.similarity(dist))
                    .collect::<Vec<f32>>(),
            );
            let keyword_leg = normalize_scores(
                &candidates
                    .iter()
                    .map(|&(id, _)| {
                        self.keyword
                            .score(query, &self.passages[id as usize].text)
                            as f32
                    })
                    .collect::<Vec<f32>>(),
            );
            candidates
                .iter()
                .zip(vector_leg.iter().zip(keyword_leg.iter()))
                .map(|(&(id, _), (&v, &k))| (id, gemma * v + (1.0 - gemma) * k))
                .collect()
        };
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }
}

/// Min-max normalize to `[0, 1]`. A degenerate range (all equal, or raw
/// zeros from a keyword leg with no overlap anywhere) maps to the raw
/// values clamped, so an all-zero leg stays zero instead of inflating.
fn normalize_scores(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return values.iter().map(|&v| v.clamp(0.0, 1.0)).collect();
    }
    values.iter().map(|&v| (v - min) / range).collect()
}
