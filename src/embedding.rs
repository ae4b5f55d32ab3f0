//! Embedding collaborator interface and vector storage.
//!
//! The embedding model is a black box behind [`Embedder`]: the index never
//! loads a model itself, it asks the collaborator to embed text, both at
//! ingest time and — for recompute-marked nodes — during search.
//!
//! Vectors live in a flat `f32` slab (structure-of-arrays by node). A
//! compacted index keeps only hub nodes' vectors resident; the rest resolve
//! through [`EmbeddingSource`] at query time, so the traversal loop never
//! knows which kind of node it is visiting.

use crate::error::{IndexError, Result};
use crate::passages::Passage;
use std::collections::HashMap;
use tracing::warn;

/// Batched embedding collaborator.
///
/// Implementations wrap whatever actually produces vectors (an HTTP server,
/// an in-process model, a test stub). Calls are expected to block on
/// external I/O; the index issues them in small batches and treats a failed
/// batch as degrading only the items in it.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the manifest and checked on reopen.
    fn model_name(&self) -> &str;

    /// Vector dimensionality this model produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`.
///
/// A failed batch yields `None` for its items (with a warning) instead of
/// failing the whole call; only if every batch fails is the call itself an
/// error. A batch that returns the wrong item count or a wrong-dimension
/// vector is treated as failed.
pub fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Option<Vec<f32>>>> {
    let batch_size = batch_size.max(1);
    let dimension = embedder.dimension();
    let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
    let mut failed_batches = 0usize;
    let mut total_batches = 0usize;

    for batch in texts.chunks(batch_size) {
        total_batches += 1;
        match embedder.embed(batch) {
            Ok(vectors) if vectors.len() == batch.len() => {
                for vector in vectors {
                    if vector.len() == dimension {
                        out.push(Some(vector));
                    } else {
                        warn!(
                            expected = dimension,
                            actual = vector.len(),
                            "embedder returned wrong-dimension vector, dropping item"
                        );
                        out.push(None);
                    }
                }
            }
            Ok(vectors) => {
                warn!(
                    expected = batch.len(),
                    actual = vectors.len(),
                    "embedder returned wrong item count, dropping batch"
                );
                failed_batches += 1;
                out.extend(std::iter::repeat_with(|| None).take(batch.len()));
            }
            Err(e) => {
                warn!(error = %e, items = batch.len(), "embedding batch failed, dropping items");
                failed_batches += 1;
                out.extend(std::iter::repeat_with(|| None).take(batch.len()));
            }
        }
    }

    if total_batches > 0 && failed_batches == total_batches {
        return Err(IndexError::EmbeddingUnavailable { failed: texts.len() });
    }
    Ok(out)
}

/// Flat slab of vectors, indexed by node.
#[derive(Debug, Clone, Default)]
pub struct VectorSlab {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorSlab {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::InvalidParameter(format!(
                "vector has dimension {}, slab expects {}",
                vector.len(),
                self.dimension
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> &[f32] {
        let start = idx * self.dimension;
        &self.data[start..start + self.dimension]
    }

    #[must_use]
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

/// Resident embedding storage: a packed slab plus a node → slot map.
///
/// A fully resident store maps every node; a compacted one maps only the
/// nodes the compaction pass kept.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    dimension: usize,
    slots: Vec<Option<u32>>,
    data: VectorSlab,
}

impl EmbeddingStore {
    /// Build a fully resident store from a dense slab.
    #[must_use]
    pub fn full(slab: VectorSlab) -> Self {
        let slots = (0..slab.len() as u32).map(Some).collect();
        Self {
            dimension: slab.dimension(),
            slots,
            data: slab,
        }
    }

    /// Build a compacted store keeping only nodes where `resident[id]`.
    pub fn compacted(slab: &VectorSlab, resident: &[bool]) -> Result<Self> {
        if resident.len() != slab.len() {
            return Err(IndexError::InvalidParameter(format!(
                "resident bitmap has {} entries for {} vectors",
                resident.len(),
                slab.len()
            )));
        }
        let mut data = VectorSlab::new(slab.dimension());
        let mut slots = Vec::with_capacity(slab.len());
        let mut next = 0u32;
        for (idx, &keep) in resident.iter().enumerate() {
            if keep {
                data.push(slab.get(idx))?;
                slots.push(Some(next));
                next += 1;
            } else {
                slots.push(None);
            }
        }
        Ok(Self {
            dimension: slab.dimension(),
            slots,
            data,
        })
    }

    /// Reassemble from persisted parts (bitmap + packed data).
    pub(crate) fn from_parts(dimension: usize, resident: &[bool], packed: VectorSlab) -> Result<Self> {
        let expected = resident.iter().filter(|&&r| r).count();
        if packed.len() != expected {
            return Err(IndexError::Format(format!(
                "blob holds {} resident vectors but bitmap marks {}",
                packed.len(),
                expected
            )));
        }
        let mut slots = Vec::with_capacity(resident.len());
        let mut next = 0u32;
        for &keep in resident {
            if keep {
                slots.push(Some(next));
                next += 1;
            } else {
                slots.push(None);
            }
        }
        Ok(Self {
            dimension,
            slots,
            data: packed,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total nodes tracked (resident or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn is_resident(&self, id: u32) -> bool {
        self.slots.get(id as usize).is_some_and(|s| s.is_some())
    }

    /// The resident vector for `id`, if it was kept.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&[f32]> {
        let slot = (*self.slots.get(id as usize)?)?;
        Some(self.data.get(slot as usize))
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.data.len()
    }

    /// Bytes of resident vector data (the storage-saving figure).
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.data.as_flat().len() * std::mem::size_of::<f32>()
    }

    /// Residency bitmap, one bool per node.
    #[must_use]
    pub fn resident_bitmap(&self) -> Vec<bool> {
        self.slots.iter().map(|s| s.is_some()).collect()
    }

    #[must_use]
    pub(crate) fn packed(&self) -> &VectorSlab {
        &self.data
    }
}

/// Per-node vector resolution during traversal.
///
/// The search loop is agnostic to whether a node's vector is resident or
/// must be recomputed; it just calls [`EmbeddingSource::resolve`]. `None`
/// means the vector is unavailable (embedding failure) and the node should
/// be skipped, not the search failed.
pub trait EmbeddingSource {
    /// Resolve the vector for node `id`.
    fn resolve(&mut self, id: u32) -> Option<&[f32]>;

    /// Hint that `ids` are about to be resolved; lets the recompute path
    /// batch its collaborator round-trips.
    fn prefetch(&mut self, _ids: &[u32]) {}
}

/// Source over a fully resident store (or build-time slab).
pub struct ResidentSource<'a> {
    store: &'a EmbeddingStore,
}

impl<'a> ResidentSource<'a> {
    #[must_use]
    pub fn new(store: &'a EmbeddingStore) -> Self {
        Self { store }
    }
}

impl EmbeddingSource for ResidentSource<'_> {
    fn resolve(&mut self, id: u32) -> Option<&[f32]> {
        self.store.get(id)
    }
}

/// Source that falls back to recomputing evicted vectors through the
/// embedding collaborator, with a cache scoped to one search call.
pub struct RecomputeSource<'a> {
    store: &'a EmbeddingStore,
    passages: &'a [Passage],
    embedder: &'a dyn Embedder,
    batch_size: usize,
    cache: HashMap<u32, Option<Vec<f32>>>,
    recomputed: usize,
    failures: usize,
}

impl<'a> RecomputeSource<'a> {
    #[must_use]
    pub fn new(
        store: &'a EmbeddingStore,
        passages: &'a [Passage],
        embedder: &'a dyn Embedder,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            passages,
            embedder,
            batch_size: batch_size.max(1),
            cache: HashMap::new(),
            recomputed: 0,
            failures: 0,
        }
    }

    /// Vectors recomputed through the collaborator during this call.
    #[must_use]
    pub fn recomputed(&self) -> usize {
        self.recomputed
    }

    /// Candidates dropped because their recompute failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }

    fn fetch(&mut self, ids: &[u32]) {
        let wanted: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|&id| {
                !self.store.is_resident(id)
                    && !self.cache.contains_key(&id)
                    && (id as usize) < self.passages.len()
            })
            .collect();
        if wanted.is_empty() {
            return;
        }
        let texts: Vec<&str> = wanted
            .iter()
            .map(|&id| self.passages[id as usize].text.as_str())
            .collect();
        match embed_in_batches(self.embedder, &texts, self.batch_size) {
            Ok(vectors) => {
                for (id, vector) in wanted.into_iter().zip(vectors) {
                    match vector {
                        Some(v) => {
                            self.recomputed += 1;
                            self.cache.insert(id, Some(v));
                        }
                        None => {
                            self.failures += 1;
                            self.cache.insert(id, None);
                        }
                    }
                }
            }
            Err(_) => {
                self.failures += wanted.len();
                for id in wanted {
                    self.cache.insert(id, None);
                }
            }
        }
    }
}

impl EmbeddingSource for RecomputeSource<'_> {
    fn resolve(&mut self, id: u32) -> Option<&[f32]> {
        if self.store.is_resident(id) {
            return self.store.get(id);
        }
        if !self.cache.contains_key(&id) {
            self.fetch(&[id]);
        }
        self.cache.get(&id).and_then(|v| v.as_deref())
    }

    fn prefetch(&mut self, ids: &[u32]) {
        self.fetch(ids);
    }
}
