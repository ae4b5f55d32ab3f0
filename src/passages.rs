//! Append-only passage log.
//!
//! One JSON object per line, `<name>.passages.jsonl`. The log is the
//! source of truth for passage text and metadata: the graph references
//! passages by ID only, and the log must be independently recoverable even
//! if a build crashes before the graph blob lands.
//!
//! IDs are assigned as `count, count+1, ...` in insertion order and are
//! never reused. Incremental builders may pre-compute IDs as
//! `existing_total + offset`; [`PassageLog::append_batch`] rejects a batch
//! whose starting ID does not equal the current count, which catches two
//! builders racing on the same index before they can interleave IDs.

use crate::error::{IndexError, Result};
use crate::metadata::MetadataMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A stored passage: text plus free-form metadata, keyed by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub metadata: MetadataMap,
}

/// Append-only JSONL log of passages.
pub struct PassageLog {
    path: PathBuf,
    writer: BufWriter<File>,
    count: u64,
}

impl PassageLog {
    /// Create a fresh log at `path`, truncating any existing one.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    /// Open an existing log for appending.
    ///
    /// Counts the readable records already present; corrupt lines are
    /// skipped (and do not consume IDs), matching iteration behavior. A torn
    /// tail (bytes after the last newline, left by a crash mid-append) is
    /// truncated so the next record does not concatenate onto it.
    pub fn open_append(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut count = 0u64;
        let mut line_end = 0usize;
        let mut start = 0usize;
        for (i, &b) in data.iter().enumerate() {
            if b != b'\n' {
                continue;
            }
            let line = &data[start..i];
            if !line.iter().all(u8::is_ascii_whitespace)
                && serde_json::from_slice::<Passage>(line).is_ok()
            {
                count += 1;
            }
            line_end = i + 1;
            start = i + 1;
        }
        if line_end < data.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = data.len() - line_end,
                "truncating torn tail of passage log"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(line_end as u64)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            count,
        })
    }

    /// Number of passages in the log.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one passage, assigning the next ID. The record is flushed to
    /// the OS before this returns, so a crash mid-build cannot lose a
    /// passage the graph already references.
    pub fn append(&mut self, text: &str, metadata: MetadataMap) -> Result<u64> {
        let id = self.count;
        let passage = Passage {
            id,
            text: text.to_string(),
            metadata,
        };
        let line = serde_json::to_string(&passage)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.count += 1;
        Ok(id)
    }

    /// Append a batch whose caller pre-computed IDs starting at
    /// `expected_start`. Rejected unless `expected_start` equals the current
    /// count (prevents silent ID collisions from concurrent builders).
    pub fn append_batch(
        &mut self,
        expected_start: u64,
        items: impl IntoIterator<Item = (String, MetadataMap)>,
    ) -> Result<u64> {
        if expected_start != self.count {
            return Err(IndexError::InvalidParameter(format!(
                "batch starts at ID {} but the log holds {} passages",
                expected_start, self.count
            )));
        }
        let mut appended = 0u64;
        for (text, metadata) in items {
            self.append(&text, metadata)?;
            appended += 1;
        }
        Ok(appended)
    }

    /// Force the log contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Restartable iteration: re-opens the file from the beginning.
    pub fn iter(&self) -> Result<PassageIter> {
        PassageIter::open(&self.path)
    }

    /// Linear-scan lookup by ID.
    pub fn get(&self, id: u64) -> Result<Option<Passage>> {
        Ok(self.iter()?.find(|p| p.id == id))
    }
}

/// Iterator over a passage log file.
///
/// Corrupt or truncated lines (a crash can tear the last record) are
/// skipped with a warning, never fatal to iteration.
pub struct PassageIter {
    lines: Lines<BufReader<File>>,
    line_no: u64,
    path: PathBuf,
}

impl PassageIter {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
            path: path.to_path_buf(),
        })
    }
}

impl Iterator for PassageIter {
    type Item = Passage;

    fn next(&mut self) -> Option<Passage> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "passage log read error, stopping iteration");
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Passage>(&line) {
                Ok(passage) => return Some(passage),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = self.line_no,
                        error = %e,
                        "skipping corrupt passage record"
                    );
                }
            }
        }
    }
}

/// Load every readable passage from a log file.
pub fn read_all(path: &Path) -> Result<Vec<Passage>> {
    if !path.exists() {
        return Err(IndexError::IndexNotFound(path.to_path_buf()));
    }
    Ok(PassageIter::open(path)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Value;

    fn meta(key: &str, value: &str) -> MetadataMap {
        [(key.to_string(), Value::Str(value.to_string()))]
            .into_iter()
            .collect()
    }

    #[test]
    fn append_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.passages.jsonl");
        let mut log = PassageLog::create(&path).unwrap();

        let id = log.append("cats are mammals", meta("kind", "fact")).unwrap();
        assert_eq!(id, 0);
        let id = log.append("rust is a language", meta("kind", "fact")).unwrap();
        assert_eq!(id, 1);

        let p = log.get(1).unwrap().unwrap();
        assert_eq!(p.text, "rust is a language");
        assert_eq!(p.metadata, meta("kind", "fact"));
    }

    #[test]
    fn iteration_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.passages.jsonl");
        let mut log = PassageLog::create(&path).unwrap();
        for i in 0..5 {
            log.append(&format!("passage {i}"), MetadataMap::new()).unwrap();
        }
        assert_eq!(log.iter().unwrap().count(), 5);
        assert_eq!(log.iter().unwrap().count(), 5);
    }

    #[test]
    fn torn_tail_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.passages.jsonl");
        let mut log = PassageLog::create(&path).unwrap();
        log.append("first", MetadataMap::new()).unwrap();
        log.append("second", MetadataMap::new()).unwrap();
        drop(log);

        // Simulate a crash tearing the last record.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":2,\"text\":\"tor").unwrap();
        drop(file);

        let passages = read_all(&path).unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[1].text, "second");

        // Re-opening for append truncates the torn record; the next append
        // lands on a clean line.
        let mut log = PassageLog::open_append(&path).unwrap();
        assert_eq!(log.len(), 2);
        let id = log.append("third", MetadataMap::new()).unwrap();
        assert_eq!(id, 2);
        drop(log);

        let passages = read_all(&path).unwrap();
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[2].text, "third");
    }

    #[test]
    fn batch_with_wrong_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.passages.jsonl");
        let mut log = PassageLog::create(&path).unwrap();
        log.append("only", MetadataMap::new()).unwrap();

        let err = log
            .append_batch(0, vec![("dup".to_string(), MetadataMap::new())])
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidParameter(_)));

        let appended = log
            .append_batch(1, vec![("ok".to_string(), MetadataMap::new())])
            .unwrap();
        assert_eq!(appended, 1);
        assert_eq!(log.len(), 2);
    }
}
