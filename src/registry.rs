//! Shared searcher registry with an explicit lifecycle.
//!
//! Long-lived hosts (an MCP server, a REPL) want one loaded searcher per
//! index path rather than reloading the blob per query. The registry is
//! that cache, as an owned object with open/close — not ambient global
//! state — so tests and embedders can scope it.

use crate::embedding::Embedder;
use crate::error::Result;
use crate::searcher::IndexSearcher;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Cache of open searchers keyed by index path.
#[derive(Default)]
pub struct SearcherRegistry {
    inner: Mutex<HashMap<PathBuf, Arc<IndexSearcher>>>,
}

impl SearcherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Return the cached searcher for `path`, opening it on first use.
    ///
    /// The embedder is only consulted when the searcher is actually opened;
    /// a cached entry keeps the embedder it was opened with.
    pub fn open(&self, path: &Path, embedder: Arc<dyn Embedder>) -> Result<Arc<IndexSearcher>> {
        let key = Self::key(path);
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(searcher) = inner.get(&key) {
            return Ok(Arc::clone(searcher));
        }
        debug!(path = %key.display(), "opening searcher");
        let searcher = Arc::new(IndexSearcher::open(path, embedder)?);
        inner.insert(key, Arc::clone(&searcher));
        Ok(searcher)
    }

    /// Drop the cached searcher for `path`. Existing `Arc` handles stay
    /// valid; the next `open` reloads from disk. Returns whether an entry
    /// was present.
    pub fn close(&self, path: &Path) -> bool {
        let key = Self::key(path);
        self.inner
            .lock()
            .expect("registry poisoned")
            .remove(&key)
            .is_some()
    }

    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        let key = Self::key(path);
        self.inner
            .lock()
            .expect("registry poisoned")
            .contains_key(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached searcher.
    pub fn clear(&self) {
        self.inner.lock().expect("registry poisoned").clear();
    }
}
