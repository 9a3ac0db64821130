//! Opaque byte-string keys shared by the memtable, SSTables and the LSM tree.
//!
//! Mirrors the reference engine's `Key<T: AsRef<[u8]>>` wrapper, but drops the
//! borrowed/owned split (and the MVCC timestamp suffix) that the original
//! pursued: this crate's keys are always owned, timestamp-free vector ids.

use bytes::Bytes;
use std::fmt;

/// A lexicographically-ordered, opaque byte string. Used both as the LSM's
/// key type and, in `VectorId` form, as the identifier callers pass to
/// `VectorStore` and `HNSWIndex`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::new(Bytes::from(s.into_bytes()))
    }
}

impl From<&[u8]> for Key {
    fn from(s: &[u8]) -> Self {
        Key::new(Bytes::copy_from_slice(s))
    }
}

impl From<Vec<u8>> for Key {
    fn from(s: Vec<u8>) -> Self {
        Key::new(Bytes::from(s))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({:?})", s),
            Err(_) => write!(f, "Key({:?})", &self.0[..]),
        }
    }
}

/// The caller-facing alias: an opaque, non-empty identifier for a stored vector.
pub type VectorId = Key;

/// Serializes a key for storage in an SSTable's JSON-lines record: lossy for
/// arbitrary bytes, but vector ids are expected to be printable strings, and
/// non-UTF8 ids round-trip via the escaped-bytes fallback below.
pub(crate) fn key_to_string(key: &Key) -> String {
    match std::str::from_utf8(key.as_slice()) {
        Ok(s) => format!("s:{s}"),
        Err(_) => {
            let mut out = String::from("b:");
            for b in key.as_slice() {
                out.push_str(&format!("{:02x}", b));
            }
            out
        }
    }
}

pub(crate) fn key_from_string(s: &str) -> Key {
    if let Some(rest) = s.strip_prefix("s:") {
        Key::from(rest)
    } else if let Some(rest) = s.strip_prefix("b:") {
        let bytes = (0..rest.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&rest[i..i + 2], 16).unwrap_or(0))
            .collect::<Vec<u8>>();
        Key::from(bytes)
    } else {
        Key::from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_printable_keys() {
        let k = Key::from("vector-42");
        let s = key_to_string(&k);
        assert_eq!(key_from_string(&s), k);
    }

    #[test]
    fn round_trips_non_utf8_keys() {
        let k = Key::from(vec![0xff, 0x00, 0x10]);
        let s = key_to_string(&k);
        assert_eq!(key_from_string(&s), k);
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(Key::from("a") < Key::from("b"));
        assert!(Key::from("aa") < Key::from("ab"));
    }
}
