//! Index builder: ingest passages, build or append to an index on disk.
//!
//! The builder buffers `(text, metadata)` pairs, embeds them through the
//! collaborator in batches, and writes the three on-disk artifacts:
//! passage log, graph+embedding blob, manifest. `build_index` creates an
//! index from scratch; `update_index` appends to an existing one using the
//! same per-node insertion the original build used.
//!
//! Builds and appends are exclusive: only one builder may mutate a given
//! index path at a time. Concurrent `update_index` calls against the same
//! path are undefined behavior — callers serialize them (the typical
//! deployment holds a file lock around the whole build step).

use crate::compact::{self, CompactionPolicy};
use crate::distance::DistanceMetric;
use crate::embedding::{embed_in_batches, Embedder, EmbeddingStore, VectorSlab};
use crate::error::{IndexError, Result};
use crate::format::{read_blob, write_blob};
use crate::graph::{build as graph_build, GraphParams};
use crate::manifest::{IndexPaths, Manifest, MANIFEST_VERSION};
use crate::metadata::MetadataMap;
use crate::passages::{read_all, PassageLog};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Build-time options.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Distance metric the index is built with.
    pub metric: DistanceMetric,
    /// Max neighbors per node (M).
    pub graph_degree: usize,
    /// Candidate-list size during construction.
    pub build_complexity: usize,
    /// Run the compaction pass: keep only hub embeddings resident and
    /// recompute the rest at query time. Leave off when further incremental
    /// appends are anticipated.
    pub compact: bool,
    /// Allow `update_index` to un-compact a compacted index (recomputing
    /// every evicted vector once). Off by default so the cost is explicit.
    pub allow_uncompact: bool,
    /// Batch size for embedding-collaborator calls.
    pub embed_batch_size: usize,
    /// Hub-detection policy used when `compact` is set.
    pub compaction: CompactionPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            graph_degree: 32,
            build_complexity: 64,
            compact: false,
            allow_uncompact: false,
            embed_batch_size: 32,
            compaction: CompactionPolicy::default(),
        }
    }
}

/// Outcome counters for a build or append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Passages now in the index.
    pub total_passages: u64,
    /// Passages added by this call.
    pub added: u64,
    /// Buffered texts dropped because their embedding failed.
    pub dropped: u64,
    /// Embeddings kept resident on disk.
    pub resident: usize,
}

/// Graph node IDs are `u32` internally; the store keeps the conversion
/// from the `u64` passage ID space lossless by capping the total.
fn ensure_id_space(existing: usize, adding: usize) -> Result<()> {
    if existing as u64 + adding as u64 >= u32::MAX as u64 {
        return Err(IndexError::InvalidParameter(format!(
            "{} passages would exceed the {} node limit",
            existing as u64 + adding as u64,
            u32::MAX
        )));
    }
    Ok(())
}

/// Buffers passages and writes indexes.
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    options: BuildOptions,
    pending: Vec<(String, MetadataMap)>,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_options(embedder, BuildOptions::default())
    }

    pub fn with_options(embedder: Arc<dyn Embedder>, options: BuildOptions) -> Self {
        Self {
            embedder,
            options,
            pending: Vec::new(),
        }
    }

    /// Buffer one passage for the next build/append.
    pub fn add_text(&mut self, text: impl Into<String>, metadata: MetadataMap) {
        self.pending.push((text.into(), metadata));
    }

    /// Buffered passages not yet written.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn validate_options(&self) -> Result<()> {
        if self.options.graph_degree < 2 {
            return Err(IndexError::InvalidParameter(format!(
                "graph_degree {} is below the minimum of 2",
                self.options.graph_degree
            )));
        }
        if self.embedder.dimension() == 0 {
            return Err(IndexError::InvalidParameter(
                "embedder reports dimension 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Embed the pending texts; failures drop the passage (it never gets an
    /// ID). Returns `(kept pairs, vectors, dropped)`.
    #[allow(clippy::type_complexity)]
    fn embed_pending(&self) -> Result<(Vec<(String, MetadataMap)>, Vec<Vec<f32>>, u64)> {
        let texts: Vec<&str> = self.pending.iter().map(|(t, _)| t.as_str()).collect();
        if texts.is_empty() {
            return Ok((Vec::new(), Vec::new(), 0));
        }
        let embedded = embed_in_batches(&*self.embedder, &texts, self.options.embed_batch_size)?;
        let mut kept = Vec::with_capacity(embedded.len());
        let mut vectors = Vec::with_capacity(embedded.len());
        let mut dropped = 0u64;
        for ((text, metadata), vector) in self.pending.iter().zip(embedded) {
            match vector {
                Some(v) => {
                    kept.push((text.clone(), metadata.clone()));
                    vectors.push(v);
                }
                None => {
                    dropped += 1;
                    warn!(text_len = text.len(), "dropping passage: embedding failed");
                }
            }
        }
        Ok((kept, vectors, dropped))
    }

    /// Build a fresh index at `index_path`, replacing any existing one.
    ///
    /// Artifacts land in dependency order — passages first, then the blob,
    /// then the manifest (each atomically) — so a crash leaves either the
    /// previous index or nothing loadable, never a half-linked graph.
    pub fn build_index(&mut self, index_path: &Path) -> Result<BuildSummary> {
        self.validate_options()?;
        let paths = IndexPaths::for_index(index_path);
        if let Some(parent) = index_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (kept, vectors, dropped) = self.embed_pending()?;
        ensure_id_space(0, kept.len())?;

        let mut log = PassageLog::create(&paths.passages)?;
        log.append_batch(0, kept)?;
        log.sync()?;

        let dimension = self.embedder.dimension();
        let mut slab = VectorSlab::new(dimension);
        for vector in &vectors {
            slab.push(vector)?;
        }

        let params = GraphParams::new(self.options.graph_degree, self.options.build_complexity);
        let graph = graph_build::build(&slab, self.options.metric, &params)?;

        let store = if self.options.compact {
            let plan = compact::plan(&graph, &self.options.compaction);
            EmbeddingStore::compacted(&slab, &plan.resident)?
        } else {
            EmbeddingStore::full(slab)
        };

        write_blob(&paths.blob, &graph, &store, self.options.metric)?;

        let manifest = Manifest {
            format_version: MANIFEST_VERSION,
            embedding_model: self.embedder.model_name().to_string(),
            dimension: dimension as u32,
            metric: self.options.metric,
            graph_degree: self.options.graph_degree as u32,
            build_complexity: self.options.build_complexity as u32,
            total_passages: log.len(),
            is_compact: self.options.compact,
            is_recompute: self.options.compact,
            created_at: Manifest::now(),
        };
        manifest.save(&paths.meta)?;

        info!(
            total = manifest.total_passages,
            dropped,
            resident = store.resident_count(),
            compact = self.options.compact,
            "index built"
        );
        self.pending.clear();
        Ok(BuildSummary {
            total_passages: manifest.total_passages,
            added: manifest.total_passages,
            dropped,
            resident: store.resident_count(),
        })
    }

    /// Append the buffered passages to an existing index.
    ///
    /// Compatibility (embedding model, dimension, metric) is checked against
    /// the manifest before anything is written. The graph degree always
    /// comes from the existing index — it is structural — while the build
    /// complexity may differ per append.
    pub fn update_index(&mut self, index_path: &Path) -> Result<BuildSummary> {
        self.validate_options()?;
        let paths = IndexPaths::for_index(index_path);

        let mut manifest = Manifest::load(&paths.meta)?;
        manifest.ensure_embedder(self.embedder.model_name(), self.embedder.dimension())?;
        manifest.ensure_metric(self.options.metric)?;

        if (manifest.is_compact || manifest.is_recompute) && !self.options.allow_uncompact {
            return Err(IndexError::InvalidParameter(
                "index is compacted; appending requires allow_uncompact (recomputes evicted \
                 vectors once and rewrites the index fully resident)"
                    .to_string(),
            ));
        }

        let (mut graph, store, blob_metric) = read_blob(&paths.blob)?;
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
        let indexed = graph.len();
        let logged = passages.len();

        // Vectors the slab must recover before anything new is linked:
        // embeddings the compaction pass evicted, plus any passages a
        // crashed previous append logged but never indexed.
        let mut missing: Vec<u32> = (0..indexed as u32)
            .filter(|&id| !store.is_resident(id))
            .collect();
        if logged > indexed {
            warn!(
                orphans = logged - indexed,
                "passage log ran ahead of the graph; re-indexing the tail"
            );
            missing.extend(indexed as u32..logged as u32);
        }

        let mut slab = VectorSlab::new(self.embedder.dimension());
        let mut recomputed = std::collections::HashMap::new();
        if !missing.is_empty() {
            info!(count = missing.len(), "recomputing vectors absent from the blob");
            let texts: Vec<&str> = missing
                .iter()
                .map(|&id| passages[id as usize].text.as_str())
                .collect();
            let vectors =
                embed_in_batches(&*self.embedder, &texts, self.options.embed_batch_size)?;
            let failed = vectors.iter().filter(|v| v.is_none()).count();
            if failed > 0 {
                // A hole in the existing vector set would corrupt the graph
                // geometry; appending cannot proceed without every vector.
                return Err(IndexError::EmbeddingUnavailable { failed });
            }
            for (&id, vector) in missing.iter().zip(vectors) {
                recomputed.insert(id, vector.expect("checked above"));
            }
        }
        for id in 0..logged as u32 {
            match store.get(id) {
                Some(v) => slab.push(v)?,
                None => slab.push(&recomputed[&id])?,
            }
        }

        let (kept, vectors, dropped) = self.embed_pending()?;
        ensure_id_space(logged, kept.len())?;
        if kept.is_empty() && logged == indexed {
            info!("update_index: nothing to append");
            self.pending.clear();
            return Ok(BuildSummary {
                total_passages: manifest.total_passages,
                added: 0,
                dropped,
                resident: store.resident_count(),
            });
        }

        // IDs continue from the logged total; the log re-checks the
        // starting offset to catch a concurrent builder.
        let mut log = PassageLog::open_append(&paths.passages)?;
        let added = log.append_batch(logged as u64, kept)?;
        log.sync()?;

        for vector in &vectors {
            slab.push(vector)?;
        }
        let params = GraphParams::new(
            manifest.graph_degree as usize,
            self.options.build_complexity,
        );
        graph_build::extend(&mut graph, &slab, manifest.metric, &params, indexed)?;

        // Appends keep everything resident; a fresh compaction pass is a
        // rebuild-time decision.
        let store = EmbeddingStore::full(slab);
        write_blob(&paths.blob, &graph, &store, manifest.metric)?;

        manifest.total_passages = log.len();
        manifest.is_compact = false;
        manifest.is_recompute = false;
        manifest.save(&paths.meta)?;

        info!(added, total = manifest.total_passages, "index updated");
        self.pending.clear();
        Ok(BuildSummary {
            total_passages: manifest.total_passages,
            added,
            dropped,
            resident: store.resident_count(),
        })
    }
}
