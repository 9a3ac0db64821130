//! Scenario 2 (§8): an overwrite survives multiple rounds of level-0
//! compaction into level 1.

use crate::key::VectorId;
use crate::vector_store::{VectorStore, VectorStoreOptions};

#[test]
fn overwrite_survives_repeated_compaction() {
    crate::tests::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open(
        dir.path(),
        2,
        VectorStoreOptions { memtable_size_limit: 1, ..Default::default() },
    )
    .unwrap();

    store.put(VectorId::from("k"), vec![1.0, 1.0]).unwrap();
    store.put(VectorId::from("k"), vec![2.0, 2.0]).unwrap();

    // Each of these rotates and flushes one L0 table at memtable_size_limit=1,
    // driving several rounds of cascading compaction into L1.
    for i in 0..12 {
        store.put(VectorId::from(format!("other{i}")), vec![i as f64, i as f64]).unwrap();
    }

    assert_eq!(store.get(&VectorId::from("k")).unwrap(), Some(vec![2.0, 2.0]));
}
