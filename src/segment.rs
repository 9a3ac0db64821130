//! Append-only, memory-mapped blob storage for raw (or PQ-compressed) vector
//! bytes.
//!
//! Grounded on the reference corpus's `MmapStorage` (a sharded-index,
//! WAL-backed `memmap2::MmapMut` store): this module keeps the growth
//! strategy (track a logical size separately from the mmap's physical
//! length, double on overflow) and the safety discipline around resizing,
//! but drops the index/WAL/sharding machinery that component carries —
//! `Segment` is a dumb, offset-addressed byte file; the `vector_id -> offset`
//! index lives one layer up, in the `LSMTree`.

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StoreError};

/// Bytes reserved at the front of the file for the logical-size header.
/// Lets a reopened segment recover its true data length even though the
/// backing file is over-allocated for amortized growth.
const HEADER_SIZE: u64 = 8;
const INITIAL_CAPACITY: u64 = 64 * 1024;
const MIN_GROWTH: u64 = 64 * 1024;

/// An append-only byte file, identified by a monotonically increasing id
/// and named `segment_NNNNNN`. Bytes, once written, never move or mutate.
pub struct Segment {
    path: PathBuf,
    file: File,
    mmap: RwLock<MmapMut>,
    /// Logical size of the *data region*, i.e. excluding `HEADER_SIZE`.
    logical_size: AtomicU64,
}

pub fn segment_name(id: u64) -> String {
    format!("segment_{id:06}.db")
}

pub fn segment_path(base: &Path, id: u64) -> PathBuf {
    base.join(segment_name(id))
}

/// Parses the numeric id out of a `segment_NNNNNN.db` file name, if any.
pub fn parse_segment_id(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("segment_")?
        .strip_suffix(".db")?
        .parse()
        .ok()
}

impl Segment {
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        let file_len = file.metadata().map_err(|e| StoreError::io(&path, e))?.len();

        let logical_size = if create && file_len == 0 {
            file.set_len(HEADER_SIZE + INITIAL_CAPACITY)
                .map_err(|e| StoreError::io(&path, e))?;
            0
        } else if file_len < HEADER_SIZE {
            file.set_len(HEADER_SIZE + INITIAL_CAPACITY)
                .map_err(|e| StoreError::io(&path, e))?;
            0
        } else {
            // SAFETY: file is open read/write; we only read the header bytes here.
            let mmap = unsafe {
                MmapOptions::new()
                    .len(HEADER_SIZE as usize)
                    .map(&file)
                    .map_err(|e| StoreError::io(&path, e))?
            };
            u64::from_le_bytes(mmap[..8].try_into().unwrap())
        };

        // SAFETY: file has been sized to at least HEADER_SIZE + capacity above.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(|e| StoreError::io(&path, e))? };

        let segment = Segment {
            path,
            file,
            mmap: RwLock::new(mmap),
            logical_size: AtomicU64::new(logical_size),
        };
        segment.write_header(logical_size)?;
        Ok(segment)
    }

    fn write_header(&self, logical_size: u64) -> Result<()> {
        let mut mmap = self.mmap.write();
        mmap[..8].copy_from_slice(&logical_size.to_le_bytes());
        Ok(())
    }

    fn ensure_capacity(&self, required_data_len: u64) -> Result<()> {
        let required_file_len = HEADER_SIZE + required_data_len;
        let mut mmap = self.mmap.write();
        if (mmap.len() as u64) >= required_file_len {
            return Ok(());
        }
        mmap.flush().map_err(|e| StoreError::io(&self.path, e))?;
        let current_len = mmap.len() as u64;
        let doubled = current_len.saturating_mul(2);
        let with_headroom = required_file_len.saturating_add(MIN_GROWTH);
        let new_len = doubled.max(with_headroom);
        self.file
            .set_len(new_len)
            .map_err(|e| StoreError::io(&self.path, e))?;
        // SAFETY: file has just been grown to new_len via set_len above.
        *mmap = unsafe { MmapMut::map_mut(&self.file).map_err(|e| StoreError::io(&self.path, e))? };
        Ok(())
    }

    /// Appends `bytes` and returns the offset (relative to the data region)
    /// at which they now live. The offset equals the logical size observed
    /// immediately before this call.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let offset = self.logical_size.load(Ordering::SeqCst);
        let new_logical_size = offset + bytes.len() as u64;
        self.ensure_capacity(new_logical_size)?;
        {
            let mut mmap = self.mmap.write();
            let start = (HEADER_SIZE + offset) as usize;
            mmap[start..start + bytes.len()].copy_from_slice(bytes);
            mmap[..8].copy_from_slice(&new_logical_size.to_le_bytes());
        }
        self.logical_size.store(new_logical_size, Ordering::SeqCst);
        Ok(offset)
    }

    /// Reads `[offset, min(offset + size, logical_size))`. Empty if
    /// `offset >= logical_size`.
    pub fn read(&self, offset: u64, size: u64) -> Vec<u8> {
        let logical_size = self.logical_size.load(Ordering::SeqCst);
        if offset >= logical_size {
            return Vec::new();
        }
        let end = (offset + size).min(logical_size);
        let mmap = self.mmap.read();
        let start = (HEADER_SIZE + offset) as usize;
        let end = (HEADER_SIZE + end) as usize;
        mmap[start..end].to_vec()
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes pending writes and unmaps. Subsequent access through this
    /// handle is a logic error; the value is consumed.
    pub fn close(self) -> Result<()> {
        let mmap = self.mmap.read();
        mmap.flush().map_err(|e| StoreError::io(&self.path, e))
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(mmap) = self.mmap.try_read() {
            let _ = mmap.flush();
        }
    }
}
