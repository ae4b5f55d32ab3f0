//! Binary blob format: graph adjacency + resident embeddings.
//!
//! The blob is the `<name>` file of an index. All multi-byte integers are
//! little-endian; the whole file is covered by a trailing CRC32.
//!
//! # Layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ Header                                        │
//! │   magic: b"NLIX"                  (4 bytes)   │
//! │   version: u32                    (4 bytes)   │
//! │   dimension: u32                  (4 bytes)   │
//! │   metric: u8                      (1 byte)    │
//! │   reserved: [u8; 3]               (3 bytes)   │
//! │   node_count: u32                 (4 bytes)   │
//! │   entry_point: u32 (MAX = none)   (4 bytes)   │
//! │   degree: u32                     (4 bytes)   │
//! │   max_degree0: u32                (4 bytes)   │
//! │   layer_count: u32                (4 bytes)   │
//! ├───────────────────────────────────────────────┤
//! │ Levels: node_count × u8                       │
//! ├───────────────────────────────────────────────┤
//! │ Adjacency: per layer, per node:               │
//! │   len: u32, then len × u32 neighbor IDs       │
//! ├───────────────────────────────────────────────┤
//! │ Residency bitmap: ceil(node_count/8) bytes    │
//! │   (LSB-first within each byte)                │
//! ├───────────────────────────────────────────────┤
//! │ Resident vectors: resident_count × dim × f32  │
//! ├───────────────────────────────────────────────┤
//! │ Footer: crc32: u32 (all preceding bytes)      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Writes go through a temp file plus rename, so an aborted build leaves
//! the old blob (or nothing), never a half-linked graph a search could
//! load.

use crate::distance::DistanceMetric;
use crate::embedding::{EmbeddingStore, VectorSlab};
use crate::error::{IndexError, Result};
use crate::graph::{Graph, NeighborList};
use crate::manifest::atomic_write;
use std::path::Path;

/// Magic bytes for index blobs.
pub const BLOB_MAGIC: &[u8; 4] = b"NLIX";

/// Current blob format version.
pub const BLOB_VERSION: u32 = 1;

fn metric_tag(metric: DistanceMetric) -> u8 {
    match metric {
        DistanceMetric::L2 => 0,
        DistanceMetric::Cosine => 1,
        DistanceMetric::Dot => 2,
    }
}

fn metric_from_tag(tag: u8) -> Result<DistanceMetric> {
    match tag {
        0 => Ok(DistanceMetric::L2),
        1 => Ok(DistanceMetric::Cosine),
        2 => Ok(DistanceMetric::Dot),
        other => Err(IndexError::Format(format!("unknown metric tag {other}"))),
    }
}

/// Serialize graph + embeddings and write the blob atomically.
pub fn write_blob(
    path: &Path,
    graph: &Graph,
    store: &EmbeddingStore,
    metric: DistanceMetric,
) -> Result<()> {
    if store.len() != graph.len() {
        return Err(IndexError::GraphInvariant(format!(
            "graph has {} nodes but embedding store tracks {}",
            graph.len(),
            store.len()
        )));
    }

    let mut buf: Vec<u8> = Vec::new();
    buf.extend_from_slice(BLOB_MAGIC);
    buf.extend_from_slice(&BLOB_VERSION.to_le_bytes());
    buf.extend_from_slice(&(store.dimension() as u32).to_le_bytes());
    buf.push(metric_tag(metric));
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(&(graph.len() as u32).to_le_bytes());
    buf.extend_from_slice(&graph.entry_point().unwrap_or(u32::MAX).to_le_bytes());
    buf.extend_from_slice(&graph.degree().to_le_bytes());
    buf.extend_from_slice(&graph.max_degree0().to_le_bytes());
    buf.extend_from_slice(&(graph.layer_count() as u32).to_le_bytes());

    buf.extend_from_slice(graph.levels());

    for layer in 0..graph.layer_count() {
        for id in 0..graph.len() as u32 {
            let neighbors = graph.neighbors(layer, id);
            buf.extend_from_slice(&(neighbors.len() as u32).to_le_bytes());
            for &nbr in neighbors {
                buf.extend_from_slice(&nbr.to_le_bytes());
            }
        }
    }

    let bitmap = store.resident_bitmap();
    for chunk in bitmap.chunks(8) {
        let mut byte = 0u8;
        for (bit, &set) in chunk.iter().enumerate() {
            if set {
                byte |= 1 << bit;
            }
        }
        buf.push(byte);
    }

    for value in store.packed().as_flat() {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf);
    let checksum = hasher.finalize();
    buf.extend_from_slice(&checksum.to_le_bytes());

    atomic_write(path, &buf)
}

/// Read and verify a blob, reassembling the graph and embedding store.
pub fn read_blob(path: &Path) -> Result<(Graph, EmbeddingStore, DistanceMetric)> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::IndexNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if data.len() < 4 {
        return Err(IndexError::Format("blob shorter than its footer".to_string()));
    }

    let (body, footer) = data.split_at(data.len() - 4);
    let expected = u32::from_le_bytes(footer.try_into().expect("4-byte footer"));
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(IndexError::ChecksumMismatch { expected, actual });
    }

    let mut r = SliceReader::new(body);
    let magic = r.bytes(4)?;
    if magic != BLOB_MAGIC {
        return Err(IndexError::Format(format!(
            "bad magic {magic:?}, expected {BLOB_MAGIC:?}"
        )));
    }
    let version = r.u32()?;
    if version != BLOB_VERSION {
        return Err(IndexError::Format(format!(
            "unsupported blob version {version}"
        )));
    }
    let dimension = r.u32()? as usize;
    let metric = metric_from_tag(r.u8()?)?;
    r.bytes(3)?; // reserved
    let node_count = r.u32()? as usize;
    let entry_raw = r.u32()?;
    let entry_point = if entry_raw == u32::MAX {
        None
    } else {
        Some(entry_raw)
    };
    let degree = r.u32()?;
    let max_degree0 = r.u32()?;
    let layer_count = r.u32()? as usize;

    let levels = r.bytes(node_count)?.to_vec();

    let mut layers: Vec<Vec<NeighborList>> = Vec::with_capacity(layer_count);
    for _ in 0..layer_count {
        let mut layer = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let len = r.u32()? as usize;
            let mut list = NeighborList::with_capacity(len);
            for _ in 0..len {
                list.push(r.u32()?);
            }
            layer.push(list);
        }
        layers.push(layer);
    }

    let bitmap_bytes = node_count.div_ceil(8);
    let raw_bitmap = r.bytes(bitmap_bytes)?;
    let mut resident = Vec::with_capacity(node_count);
    for idx in 0..node_count {
        let byte = raw_bitmap[idx / 8];
        resident.push(byte & (1 << (idx % 8)) != 0);
    }

    let resident_count = resident.iter().filter(|&&keep| keep).count();
    let mut packed = VectorSlab::new(dimension);
    let mut vector = vec![0f32; dimension];
    for _ in 0..resident_count {
        for value in vector.iter_mut() {
            *value = r.f32()?;
        }
        packed.push(&vector)?;
    }
    r.finish()?;

    let graph = Graph::from_parts(layers, levels, entry_point, degree, max_degree0)?;
    let store = EmbeddingStore::from_parts(dimension, &resident, packed)?;
    Ok((graph, store, metric))
}

/// Cursor over a byte slice with short-read checking.
struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(IndexError::Format(format!(
                "blob truncated: wanted {n} bytes at offset {}",
                self.pos
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().expect("4 bytes")))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.bytes(4)?.try_into().expect("4 bytes")))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(IndexError::Format(format!(
                "{} trailing bytes after blob sections",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
