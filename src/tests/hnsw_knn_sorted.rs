//! Scenario 4 (§8): a k-NN query over a larger graph returns results sorted
//! by non-decreasing distance, each distance matching the configured metric
//! recomputed directly against the stored vector.

use crate::hnsw::metric::{DistanceMetric, Metric};
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::key::VectorId;

#[test]
fn ten_nearest_of_two_hundred_are_sorted_and_match_the_metric() {
    crate::tests::init_tracing();
    let index = HnswIndex::new(5, HnswConfig { seed: 7, ..Default::default() }).unwrap();

    let vectors: Vec<(VectorId, Vec<f64>)> = (0..200)
        .map(|i| {
            let v = vec![
                (i % 11) as f64,
                (i % 7) as f64,
                (i % 5) as f64,
                (i % 3) as f64,
                i as f64,
            ];
            (VectorId::from(format!("id-{i}")), v)
        })
        .collect();

    for (id, v) in &vectors {
        index.insert(id.clone(), v.clone()).unwrap();
    }

    let query = vec![4.0, 2.0, 1.0, 0.0, 97.0];
    let results = index.search(&query, 10);
    assert_eq!(results.len(), 10);

    for pair in results.windows(2) {
        assert!(pair[0].1 <= pair[1].1, "results not sorted: {:?}", results);
    }

    let by_id: std::collections::HashMap<_, _> = vectors.into_iter().collect();
    let metric = Metric::Euclidean;
    for (id, dist) in &results {
        let stored = &by_id[id];
        let recomputed = metric.distance(&query, stored);
        assert!((recomputed - dist).abs() < 1e-9);
    }
}
