//! nearline: a graph ANN index with selective embedding recomputation.
//!
//! Builds a navigable proximity graph (HNSW-style multi-layer) over
//! embedding vectors and serves approximate top-k search with a tunable
//! complexity/precision knob, optional hybrid vector+keyword scoring, and
//! metadata post-filtering.
//!
//! The storage-saving trick this crate exists for: after a build, a
//! compaction pass keeps full embeddings resident only for graph hub
//! nodes. Everything else is marked for recomputation — its vector is
//! regenerated from passage text through the embedding collaborator the
//! next time a search traverses it. Passage text is tiny next to a
//! float vector, so a compacted index can undercut naive vector storage by
//! a large factor at the cost of collaborator round-trips on the
//! recompute-marked fringe.
//!
//! # Layout on disk
//!
//! - `<name>.meta.json` — manifest: model, dimension, metric, build
//!   parameters, passage count. Drives compatibility checks.
//! - `<name>.passages.jsonl` — append-only passage log, one JSON object
//!   per line, independently recoverable.
//! - `<name>` — graph + embedding blob (see [`format`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! use nearline::{IndexBuilder, IndexSearcher, SearchOptions};
//! use std::sync::Arc;
//!
//! let embedder: Arc<dyn nearline::Embedder> = make_embedder();
//! let mut builder = IndexBuilder::new(embedder.clone());
//! builder.add_text("cats are mammals", Default::default());
//! builder.build_index("notes.idx".as_ref())?;
//!
//! let searcher = IndexSearcher::open("notes.idx".as_ref(), embedder)?;
//! let hits = searcher.search("feline pets", &SearchOptions::default())?;
//! ```
//!
//! # Concurrency
//!
//! A loaded [`IndexSearcher`] is immutable; searches take `&self` and may
//! run on parallel threads. Builds and appends are exclusive: concurrent
//! `update_index` calls against one path are undefined behavior and must
//! be serialized by the caller.

pub mod bm25;
pub mod builder;
pub mod compact;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod format;
pub mod graph;
pub mod manifest;
pub mod metadata;
pub mod passages;
pub mod registry;
pub mod searcher;
pub mod simd;

pub use bm25::{Bm25Scorer, KeywordScorer};
pub use builder::{BuildOptions, BuildSummary, IndexBuilder};
pub use compact::{CompactionPlan, CompactionPolicy};
pub use distance::DistanceMetric;
pub use embedding::{Embedder, EmbeddingSource, EmbeddingStore, VectorSlab};
pub use error::{IndexError, Result};
pub use manifest::{IndexPaths, Manifest};
pub use metadata::{FilterCondition, FilterOp, MetadataFilter, MetadataMap, Value};
pub use passages::{Passage, PassageLog};
pub use registry::SearcherRegistry;
pub use searcher::{
    IndexSearcher, IndexStats, SearchDiagnostics, SearchOptions, SearchResult,
};
