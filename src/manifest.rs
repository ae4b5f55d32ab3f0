//! Index manifest: the versioned descriptor persisted next to every index.
//!
//! The manifest is created at build time and is read-only afterward except
//! for `total_passages` (incremented on incremental append) and the
//! compaction flags (cleared if an append un-compacts the index). It drives
//! compatibility checks: an append or search against an index built with a
//! different embedding model, dimension, or metric must fail fast.

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// On-disk paths derived from an index path.
///
/// For index path `<name>` the layout is:
/// - `<name>.meta.json` — this manifest
/// - `<name>.passages.jsonl` — append-only passage log
/// - `<name>` — graph + embedding blob
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub meta: PathBuf,
    pub passages: PathBuf,
    pub blob: PathBuf,
}

impl IndexPaths {
    #[must_use]
    pub fn for_index(index_path: &Path) -> Self {
        let mut meta = index_path.as_os_str().to_owned();
        meta.push(".meta.json");
        let mut passages = index_path.as_os_str().to_owned();
        passages.push(".passages.jsonl");
        Self {
            meta: PathBuf::from(meta),
            passages: PathBuf::from(passages),
            blob: index_path.to_path_buf(),
        }
    }
}

/// Persisted descriptor of an index's build parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version.
    pub format_version: u32,
    /// Embedding model identifier the index was built with.
    pub embedding_model: String,
    /// Vector dimension.
    pub dimension: u32,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Max neighbors per node (M).
    pub graph_degree: u32,
    /// Candidate-list size used during construction.
    pub build_complexity: u32,
    /// Total passages across build + appends.
    pub total_passages: u64,
    /// Whether the embedding store was compacted (hub nodes only).
    pub is_compact: bool,
    /// Whether search recomputes evicted embeddings on demand.
    pub is_recompute: bool,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
}

impl Manifest {
    /// Seconds since the Unix epoch, for `created_at`.
    #[must_use]
    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Load a manifest from `path`.
    pub fn load(path: &Path) -> Result<Manifest> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::IndexNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        if manifest.format_version > MANIFEST_VERSION {
            return Err(IndexError::Format(format!(
                "manifest version {} is newer than supported version {}",
                manifest.format_version, MANIFEST_VERSION
            )));
        }
        Ok(manifest)
    }

    /// Save the manifest atomically (write-temp-then-rename), so a reader
    /// racing a build never observes a half-written manifest.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &json)
    }

    /// True if `other` can read/append to an index described by `self`.
    ///
    /// Only model, dimension, and metric matter; build parameters like
    /// degree and complexity may legitimately differ across appends.
    #[must_use]
    pub fn is_compatible(&self, other: &Manifest) -> bool {
        self.embedding_model == other.embedding_model
            && self.dimension == other.dimension
            && self.metric == other.metric
    }

    /// Check embedder identity against this manifest, naming the first
    /// mismatched field.
    pub fn ensure_embedder(&self, model: &str, dimension: usize) -> Result<()> {
        if self.embedding_model != model {
            return Err(IndexError::IncompatibleIndex {
                field: "embedding_model",
                expected: self.embedding_model.clone(),
                actual: model.to_string(),
            });
        }
        if self.dimension as usize != dimension {
            return Err(IndexError::IncompatibleIndex {
                field: "dimension",
                expected: self.dimension.to_string(),
                actual: dimension.to_string(),
            });
        }
        Ok(())
    }

    /// Check a caller's metric against this manifest.
    pub fn ensure_metric(&self, metric: DistanceMetric) -> Result<()> {
        if self.metric != metric {
            return Err(IndexError::IncompatibleIndex {
                field: "metric",
                expected: self.metric.name().to_string(),
                actual: metric.name().to_string(),
            });
        }
        Ok(())
    }
}

/// Write `data` to `path` via a temp file in the same directory plus rename.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    fs::write(&tmp, data)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Temp-file path next to `path` (rename must not cross filesystems).
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_owned();
    name.push(".tmp");
    path.with_file_name(name)
}
