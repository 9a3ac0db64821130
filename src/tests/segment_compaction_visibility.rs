//! Scenario 5 (§8): compacting segments never loses a live vector, and
//! strictly reduces the number of segment files on disk.

use crate::key::VectorId;
use crate::vector_store::{VectorStore, VectorStoreOptions};
use std::fs;

#[test]
fn compaction_across_many_segments_preserves_every_vector() {
    crate::tests::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open(
        dir.path(),
        3,
        VectorStoreOptions {
            memtable_size_limit: 1000,
            segment_size_threshold: 256,
            ..Default::default()
        },
    )
    .unwrap();

    let mut expected = Vec::new();
    for i in 0..100 {
        let id = VectorId::from(format!("v{i}"));
        let v = vec![i as f64, (i * 2) as f64, (i * 3) as f64];
        store.put(id.clone(), v.clone()).unwrap();
        expected.push((id, v));
    }

    let segments_before = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".db"))
        .count();
    assert!(segments_before >= 6, "need several segments for this scenario, got {segments_before}");

    let stats = store.maybe_compact(5).unwrap();
    assert!(stats.segments_removed > 0);

    let segments_after = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".db"))
        .count();
    assert!(segments_after < segments_before);

    for (id, v) in expected {
        assert_eq!(store.get(&id).unwrap(), Some(v));
    }
}
