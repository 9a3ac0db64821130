//! Scenario 6 (§8): vectors that reached an SSTable before close survive a
//! reopen at the same path.

use crate::key::VectorId;
use crate::vector_store::{VectorStore, VectorStoreOptions};

#[test]
fn reopen_recovers_all_flushed_vectors() {
    crate::tests::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let expected: Vec<(VectorId, Vec<f64>)> = (0..20)
        .map(|i| (VectorId::from(format!("v{i}")), vec![i as f64, (i + 1) as f64, (i * 2) as f64]))
        .collect();

    {
        let store = VectorStore::open(
            dir.path(),
            3,
            VectorStoreOptions { memtable_size_limit: 4, ..Default::default() },
        )
        .unwrap();
        for (id, v) in &expected {
            store.put(id.clone(), v.clone()).unwrap();
        }
        // memtable_size_limit=4 evenly divides 20 puts, so every entry has
        // already reached an SSTable by the time the store is dropped here.
    }

    let store = VectorStore::open(
        dir.path(),
        3,
        VectorStoreOptions { memtable_size_limit: 4, ..Default::default() },
    )
    .unwrap();
    for (id, v) in &expected {
        assert_eq!(store.get(id).unwrap(), Some(v.clone()));
    }
}
