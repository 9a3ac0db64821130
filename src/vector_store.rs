//! Glues `Segment`s, the `LsmTree<SegmentRef>` metadata map and the PQ
//! compressor into the store's public `put`/`get`/`maybe_compact` surface.
//!
//! Grounded on `original_source`'s `VectorStore`/`VectorCompactor`
//! (`slowdb/core/vector_store.py`) for the overall shape — active segment,
//! metadata-map lookup, segment compaction by live-entry migration — and on
//! the reference engine's `BlockCache` (`lsm_storage.rs`) for the
//! segment-file-descriptor cache, an `moka::sync::Cache` keyed by segment id
//! rather than `(sst_id, block_id)`.

use moka::sync::Cache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::compress::{PqCompressor, PqOptions};
use crate::error::{Result, StoreError};
use crate::key::VectorId;
use crate::lsm::LsmTree;
use crate::segment::{self, Segment};

/// Points to a single vector's bytes within a segment (§3 `SegmentRef`).
#[derive(Clone, Serialize, Deserialize)]
pub struct SegmentRef {
    pub segment_name: String,
    pub offset: u64,
    pub size: u64,
    pub compressed: bool,
}

#[derive(Clone, Debug)]
pub struct VectorStoreOptions {
    pub memtable_size_limit: usize,
    pub max_level: usize,
    /// Active segment is rotated once its logical size would exceed this
    /// after the next append (§4.5 "Rotating segments is permitted when a
    /// size threshold is crossed").
    pub segment_size_threshold: u64,
    pub segment_cache_capacity: u64,
    pub pq: PqOptions,
}

impl Default for VectorStoreOptions {
    fn default() -> Self {
        Self {
            memtable_size_limit: 1000,
            max_level: 7,
            segment_size_threshold: 64 * 1024 * 1024,
            segment_cache_capacity: 32,
            pq: PqOptions::default(),
        }
    }
}

/// Returned by `maybe_compact` (§10.5: space-accounting supplement beyond
/// what spec.md's operation table names).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub segments_removed: usize,
    pub bytes_reclaimed: u64,
}

pub struct VectorStore {
    dimension: usize,
    base_path: PathBuf,
    lsm: LsmTree<SegmentRef>,
    segments: Cache<u64, Arc<Segment>>,
    active: RwLock<(u64, Arc<Segment>)>,
    next_segment_id: AtomicU64,
    write_lock: Mutex<()>,
    compressor: RwLock<PqCompressor>,
    compression_enabled: AtomicBool,
    segment_size_threshold: u64,
}

impl VectorStore {
    /// Opens (creating if absent) a store rooted at `base_path`. Segments
    /// and SSTables share this one directory (§6 file layout).
    pub fn open(base_path: impl AsRef<Path>, dimension: usize, options: VectorStoreOptions) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| StoreError::io(&base_path, e))?;

        let mut max_id: Option<u64> = None;
        for entry in fs::read_dir(&base_path).map_err(|e| StoreError::io(&base_path, e))? {
            let entry = entry.map_err(|e| StoreError::io(&base_path, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = segment::parse_segment_id(name) {
                    max_id = Some(max_id.map_or(id, |m| m.max(id)));
                }
            }
        }

        let active_id = max_id.unwrap_or(0);
        let active_path = segment::segment_path(&base_path, active_id);
        // `create` means "this id is new, start a fresh file"; an id recovered
        // from an existing `segment_*.db` above is always a reopen (§4.1).
        let active_segment = Arc::new(Segment::open(&active_path, !active_path.exists())?);
        let next_segment_id = AtomicU64::new(active_id + 1);

        let lsm = LsmTree::open(&base_path, options.memtable_size_limit, options.max_level)?;

        let segments = Cache::new(options.segment_cache_capacity);
        segments.insert(active_id, active_segment.clone());

        Ok(Self {
            dimension,
            base_path,
            lsm,
            segments,
            active: RwLock::new((active_id, active_segment)),
            next_segment_id,
            write_lock: Mutex::new(()),
            compressor: RwLock::new(PqCompressor::new(dimension, options.pq)),
            compression_enabled: AtomicBool::new(false),
            segment_size_threshold: options.segment_size_threshold,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn open_segment(&self, id: u64) -> Result<Arc<Segment>> {
        if let Some(seg) = self.segments.get(&id) {
            return Ok(seg);
        }
        let path = segment::segment_path(&self.base_path, id);
        let seg = Arc::new(Segment::open(&path, false)?);
        self.segments.insert(id, seg.clone());
        Ok(seg)
    }

    /// Writes `vector` to the active segment and records its `SegmentRef`
    /// under `id` (§4.5 `put`).
    pub fn put(&self, id: VectorId, vector: Vec<f64>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let use_compression = self.compression_enabled.load(Ordering::SeqCst) && self.compressor.read().is_trained();
        let bytes = if use_compression {
            self.compressor.read().compress(&vector)?
        } else {
            encode_vector(&vector)
        };

        let _guard = self.write_lock.lock();
        let (active_id, active_segment) = {
            let active = self.active.read();
            (active.0, active.1.clone())
        };

        let (active_id, active_segment) = if active_segment.logical_size() > 0
            && active_segment.logical_size() + bytes.len() as u64 > self.segment_size_threshold
        {
            let new_id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
            let new_path = segment::segment_path(&self.base_path, new_id);
            let new_segment = Arc::new(Segment::open(&new_path, true)?);
            self.segments.insert(new_id, new_segment.clone());
            *self.active.write() = (new_id, new_segment.clone());
            tracing::debug!(new_id, "rotated active segment past size threshold");
            (new_id, new_segment)
        } else {
            (active_id, active_segment)
        };

        let offset = active_segment.append(&bytes)?;
        let segment_ref = SegmentRef {
            segment_name: segment::segment_name(active_id),
            offset,
            size: bytes.len() as u64,
            compressed: use_compression,
        };
        self.lsm.put(id, segment_ref)
    }

    /// Resolves `id`'s `SegmentRef` via the LSM tree and reads its bytes
    /// back out, decompressing if needed (§4.5 `get`).
    pub fn get(&self, id: &VectorId) -> Result<Option<Vec<f64>>> {
        let Some(segment_ref) = self.lsm.get(id)? else {
            return Ok(None);
        };
        let segment_id = segment::parse_segment_id(&segment_ref.segment_name).ok_or_else(|| {
            StoreError::corruption(&self.base_path, format!("unparseable segment name {}", segment_ref.segment_name))
        })?;
        let segment = self.open_segment(segment_id)?;
        let bytes = segment.read(segment_ref.offset, segment_ref.size);
        let vector = if segment_ref.compressed {
            self.compressor.read().decompress(&bytes)?
        } else {
            decode_vector(&bytes)
        };
        Ok(Some(vector))
    }

    pub fn train_compression(&self, vectors: &[Vec<f64>]) -> Result<()> {
        self.compressor.write().train(vectors)
    }

    /// Enables or disables the compressed write path. Enabling requires a
    /// prior successful `train_compression` call (§9 open question:
    /// training alone never flips this on).
    pub fn set_compression_enabled(&self, enabled: bool) -> Result<()> {
        if enabled && !self.compressor.read().is_trained() {
            return Err(StoreError::CompressorNotTrained);
        }
        self.compression_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_compression_enabled(&self) -> bool {
        self.compression_enabled.load(Ordering::SeqCst)
    }

    /// §4.5.1: if more than `threshold` segment files exist, migrate every
    /// live entry out of the non-active segments into one freshly allocated
    /// segment, repoint its `SegmentRef`, then unlink the sources. Any error
    /// migrating a single source aborts before any file is unlinked.
    pub fn maybe_compact(&self, threshold: usize) -> Result<CompactionStats> {
        let _guard = self.write_lock.lock();

        let mut all_segment_ids = Vec::new();
        for entry in fs::read_dir(&self.base_path).map_err(|e| StoreError::io(&self.base_path, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.base_path, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = segment::parse_segment_id(name) {
                    all_segment_ids.push(id);
                }
            }
        }
        if all_segment_ids.len() <= threshold {
            return Ok(CompactionStats::default());
        }

        let active_id = self.active.read().0;
        let source_ids: HashSet<u64> = all_segment_ids.into_iter().filter(|&id| id != active_id).collect();
        if source_ids.is_empty() {
            return Ok(CompactionStats::default());
        }

        let new_id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let new_path = segment::segment_path(&self.base_path, new_id);
        let new_segment = Arc::new(Segment::open(&new_path, true)?);

        let entries = self.lsm.all_entries()?;
        let mut migrated: Vec<(VectorId, SegmentRef)> = Vec::new();
        for (key, segment_ref) in &entries {
            let Some(src_id) = segment::parse_segment_id(&segment_ref.segment_name) else {
                continue;
            };
            if !source_ids.contains(&src_id) {
                continue;
            }
            let src_segment = self.open_segment(src_id)?;
            let bytes = src_segment.read(segment_ref.offset, segment_ref.size);
            let new_offset = new_segment.append(&bytes)?;
            migrated.push((
                key.clone(),
                SegmentRef {
                    segment_name: segment::segment_name(new_id),
                    offset: new_offset,
                    size: segment_ref.size,
                    compressed: segment_ref.compressed,
                },
            ));
        }

        for (key, new_ref) in migrated {
            self.lsm.update(key, new_ref)?;
        }

        let mut source_sizes: HashMap<u64, u64> = HashMap::new();
        for &id in &source_ids {
            let path = segment::segment_path(&self.base_path, id);
            if let Ok(meta) = fs::metadata(&path) {
                source_sizes.insert(id, meta.len());
            }
        }

        let mut segments_removed = 0usize;
        let mut bytes_reclaimed = 0u64;
        for &id in &source_ids {
            self.segments.invalidate(&id);
            let path = segment::segment_path(&self.base_path, id);
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            segments_removed += 1;
            bytes_reclaimed += source_sizes.get(&id).copied().unwrap_or(0);
        }
        self.segments.insert(new_id, new_segment);

        tracing::debug!(new_id, segments_removed, bytes_reclaimed, "compacted segments");
        Ok(CompactionStats { segments_removed, bytes_reclaimed })
    }
}

fn encode_vector(v: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 8);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}
