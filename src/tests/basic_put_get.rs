//! Scenario 1 (§8): a memtable rotation forced mid-batch still leaves every
//! written vector retrievable, and flushes exactly one L0 SSTable.

use crate::key::VectorId;
use crate::vector_store::{VectorStore, VectorStoreOptions};
use std::fs;

#[test]
fn forced_flush_preserves_every_vector_and_writes_one_l0_table() {
    crate::tests::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open(
        dir.path(),
        4,
        VectorStoreOptions { memtable_size_limit: 2, ..Default::default() },
    )
    .unwrap();

    store.put(VectorId::from("a"), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    store.put(VectorId::from("b"), vec![5.0, 6.0, 7.0, 8.0]).unwrap();
    store.put(VectorId::from("c"), vec![9.0, 10.0, 11.0, 12.0]).unwrap();

    assert_eq!(store.get(&VectorId::from("a")).unwrap(), Some(vec![1.0, 2.0, 3.0, 4.0]));
    assert_eq!(store.get(&VectorId::from("c")).unwrap(), Some(vec![9.0, 10.0, 11.0, 12.0]));

    let sst_count = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sst"))
        .count();
    assert_eq!(sst_count, 1);
}
