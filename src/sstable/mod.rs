//! Immutable, sorted, on-disk key-value files with an in-memory offset index.
//!
//! Grounded on the reference engine's `table.rs` (`FileObject`/`SsTable`):
//! kept is the "read a fixed byte range out of a plain `File` via
//! `read_exact_at`" access pattern and the crc32 checksum discipline from
//! `BlockMeta::encode_block_meta`. Dropped is the block-splitting, bloom
//! filter and MVCC-timestamp machinery that `table.rs`/`table/bloom.rs`
//! carry — this crate's SSTables hold one JSON-lines record per entry, as
//! the specification's simpler "self-delimited record, linear-scan rebuild"
//! contract calls for, with no trailing index block.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::key::{key_from_string, key_to_string, Key};

#[derive(Serialize, Deserialize)]
struct Record<V> {
    k: String,
    v: V,
}

pub fn sstable_name(level: usize, table_id: u64) -> String {
    format!("L{level}-{table_id}.sst")
}

pub fn sstable_path(base: &Path, level: usize, table_id: u64) -> PathBuf {
    base.join(sstable_name(level, table_id))
}

/// Parses `L{level}-{table_id}.sst` into `(level, table_id)`.
pub fn parse_sstable_name(file_name: &str) -> Option<(usize, u64)> {
    let rest = file_name.strip_prefix('L')?.strip_suffix(".sst")?;
    let (level_str, id_str) = rest.split_once('-')?;
    Some((level_str.parse().ok()?, id_str.parse().ok()?))
}

/// An immutable, key-sorted file plus the in-memory `key -> byte offset`
/// index used to seek directly to an entry's line.
pub struct SsTable<V> {
    path: PathBuf,
    level: usize,
    table_id: u64,
    file: File,
    index: BTreeMap<Key, u64>,
    first_key: Option<Key>,
    last_key: Option<Key>,
    _value: PhantomData<V>,
}

impl<V: Serialize + DeserializeOwned + Clone> SsTable<V> {
    /// Serializes `sorted_pairs` (already in ascending key order) to a new
    /// file, recording each entry's starting byte offset, then fsyncs.
    pub fn write(
        base: &Path,
        level: usize,
        table_id: u64,
        sorted_pairs: &[(Key, V)],
    ) -> Result<Self> {
        let path = sstable_path(base, level, table_id);
        let mut index = BTreeMap::new();
        let mut buf = Vec::new();
        let mut offset: u64 = 0;
        let mut first_key = None;
        let mut last_key = None;
        for (key, value) in sorted_pairs {
            let record = Record {
                k: key_to_string(key),
                v: value.clone(),
            };
            let json = serde_json::to_string(&record)
                .map_err(|e| StoreError::corruption(&path, e.to_string()))?;
            let crc = crc32fast::hash(json.as_bytes());
            let line = format!("{json}\t{crc:08x}\n");
            index.insert(key.clone(), offset);
            offset += line.len() as u64;
            buf.extend_from_slice(line.as_bytes());
            if first_key.is_none() {
                first_key = Some(key.clone());
            }
            last_key = Some(key.clone());
        }

        let mut file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
        file.write_all(&buf).map_err(|e| StoreError::io(&path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&path, e))?;
        let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;

        Ok(SsTable {
            path,
            level,
            table_id,
            file,
            index,
            first_key,
            last_key,
            _value: PhantomData,
        })
    }

    /// Reopens a previously written SSTable, rebuilding the index by linear
    /// scan (no trailing index block is ever persisted).
    pub fn open(base: &Path, level: usize, table_id: u64) -> Result<Self> {
        let path = sstable_path(base, level, table_id);
        let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        let reader = BufReader::new(File::open(&path).map_err(|e| StoreError::io(&path, e))?);

        let mut index = BTreeMap::new();
        let mut first_key = None;
        let mut last_key = None;
        let mut offset: u64 = 0;
        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::io(&path, e))?;
            let line_len = line.len() as u64 + 1; // + '\n'
            let (key, _) = parse_line(&path, &line)?;
            index.insert(key.clone(), offset);
            if first_key.is_none() {
                first_key = Some(key.clone());
            }
            last_key = Some(key);
            offset += line_len;
        }

        Ok(SsTable {
            path,
            level,
            table_id,
            file,
            index,
            first_key,
            last_key,
            _value: PhantomData,
        })
    }

    /// Looks up `key`, seeking directly to its indexed offset.
    pub fn get(&self, key: &Key) -> Result<Option<V>> {
        let Some(&offset) = self.index.get(key) else {
            return Ok(None);
        };
        let line = self.read_line_at(offset)?;
        let (_, value) = parse_line(&self.path, &line)?;
        Ok(Some(value))
    }

    /// Reads every entry back out, in ascending key order, for compaction.
    pub fn read_all(&self) -> Result<Vec<(Key, V)>> {
        let mut out = Vec::with_capacity(self.index.len());
        for (key, &offset) in &self.index {
            let line = self.read_line_at(offset)?;
            let (_, value) = parse_line(&self.path, &line)?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    fn read_line_at(&self, offset: u64) -> Result<String> {
        let file_len = self
            .file
            .metadata()
            .map_err(|e| StoreError::io(&self.path, e))?
            .len();
        let mut buf = vec![0u8; (file_len - offset) as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| StoreError::io(&self.path, e))?;
        let end = buf
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(buf.len());
        String::from_utf8(buf[..end].to_vec())
            .map_err(|e| StoreError::corruption(&self.path, e.to_string()))
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn first_key(&self) -> Option<&Key> {
        self.first_key.as_ref()
    }

    pub fn last_key(&self) -> Option<&Key> {
        self.last_key.as_ref()
    }

    /// Whether `key` could fall within this table's key range.
    pub fn covers(&self, key: &Key) -> bool {
        match (&self.first_key, &self.last_key) {
            (Some(first), Some(last)) => key >= first && key <= last,
            _ => false,
        }
    }
}

fn parse_line<V: DeserializeOwned>(path: &Path, line: &str) -> Result<(Key, V)> {
    let (json, crc_hex) = line
        .rsplit_once('\t')
        .ok_or_else(|| StoreError::corruption(path, "missing checksum separator"))?;
    let expected_crc = u32::from_str_radix(crc_hex, 16)
        .map_err(|_| StoreError::corruption(path, "malformed checksum"))?;
    let actual_crc = crc32fast::hash(json.as_bytes());
    if actual_crc != expected_crc {
        return Err(StoreError::corruption(path, "checksum mismatch"));
    }
    let record: Record<V> =
        serde_json::from_str(json).map_err(|e| StoreError::corruption(path, e.to_string()))?;
    Ok((key_from_string(&record.k), record.v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = vec![
            (Key::from("a"), 1u32),
            (Key::from("b"), 2u32),
            (Key::from("c"), 3u32),
        ];
        let table = SsTable::<u32>::write(dir.path(), 0, 1, &pairs).unwrap();
        assert_eq!(table.get(&Key::from("a")).unwrap(), Some(1));
        assert_eq!(table.get(&Key::from("c")).unwrap(), Some(3));
        assert_eq!(table.get(&Key::from("missing")).unwrap(), None);
    }

    #[test]
    fn reopen_rebuilds_index_by_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = vec![(Key::from("x"), "hello".to_string())];
        SsTable::<String>::write(dir.path(), 2, 7, &pairs).unwrap();
        let reopened = SsTable::<String>::open(dir.path(), 2, 7).unwrap();
        assert_eq!(reopened.get(&Key::from("x")).unwrap(), Some("hello".to_string()));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn filename_round_trips() {
        assert_eq!(sstable_name(3, 42), "L3-42.sst");
        assert_eq!(parse_sstable_name("L3-42.sst"), Some((3, 42)));
        assert_eq!(parse_sstable_name("nope"), None);
    }

    #[test]
    fn read_all_returns_every_entry_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = vec![
            (Key::from("a"), 1u32),
            (Key::from("b"), 2u32),
        ];
        let table = SsTable::<u32>::write(dir.path(), 0, 1, &pairs).unwrap();
        assert_eq!(table.read_all().unwrap(), pairs);
    }
}
