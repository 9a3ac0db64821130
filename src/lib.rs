//! Storage-and-indexing core of a small vector database: append-only
//! memory-mapped segments, a leveled LSM tree holding vector metadata, a
//! product-quantization compressor, and an in-memory HNSW approximate
//! nearest-neighbor index.
//!
//! Modeled on a mini-LSM teaching engine (`crossbeam-skiplist` memtable,
//! `parking_lot` locking, `moka` file-descriptor caching, `crc32fast`
//! checksums) generalized from that engine's block-based transactional
//! SSTable format to this crate's simpler vector-store contract.

#![allow(clippy::module_inception)]

pub mod compress;
pub mod error;
pub mod hnsw;
pub mod key;
pub mod lsm;
pub mod memtable;
pub mod segment;
pub mod sstable;
pub mod vector_store;

pub use compress::{PqCompressor, PqOptions};
pub use error::{Result, StoreError};
pub use hnsw::metric::{DistanceMetric, Metric};
pub use hnsw::{HnswConfig, HnswIndex};
pub use key::{Key, VectorId};
pub use lsm::LsmTree;
pub use segment::Segment;
pub use vector_store::{CompactionStats, SegmentRef, VectorStore, VectorStoreOptions};

#[cfg(test)]
mod tests;
