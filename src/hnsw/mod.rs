//! In-memory Hierarchical Navigable Small-World index for approximate k-NN.
//!
//! `original_source`'s `index/hnsw.py` is the nearest thing this crate has to
//! a reference for the algorithm's shape (layered greedy descent, a
//! `search_layer` beam search, neighbor selection by simple nearest-M), but
//! two of its behaviors are corrected rather than carried over (see module
//! doc on `search_layer` and `shrink_neighbor` below): it conflates a single
//! heap as both the unexplored-candidate queue and the bounded result set,
//! and it never re-prunes a neighbor's edge list after growing past its
//! degree bound. Locking follows the rest of this crate's reader-snapshot
//! discipline (`lsm.rs`): a single `parking_lot::RwLock` around the whole
//! graph, exclusive for insert, shared for search.

pub mod metric;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{Result, StoreError};
use crate::key::VectorId;
use metric::{DistanceMetric, Metric};

/// Tunables for `HNSWIndex::new`. Mirrors the reference engine's
/// `LsmStorageOptions` shape: one plain struct, a `Default` impl carrying
/// the values named in the spec.
#[derive(Clone, Debug)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ml_max: usize,
    /// Floor on the beam width used by `search`'s layer-0 pass. `None` (the
    /// default, per §4.6 "default k") means no floor beyond `k` itself;
    /// `Some(ef)` forces `ef = max(k, ef)` for every query, trading latency
    /// for recall.
    pub ef_search: Option<usize>,
    pub metric: String,
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ml_max: 16,
            ef_search: None,
            metric: "euclidean".to_string(),
            seed: 42,
        }
    }
}

struct Node {
    vector: Vec<f64>,
    /// `neighbors[l]` holds this node's edges at layer `l`, for `l` in `0..=l_top`.
    neighbors: Vec<HashSet<VectorId>>,
}

impl Node {
    fn l_top(&self) -> usize {
        self.neighbors.len() - 1
    }
}

struct GraphState {
    nodes: HashMap<VectorId, Node>,
    entry_point: Option<VectorId>,
    max_layer: usize,
}

/// A `(distance, id)` pair ordered by distance, `NaN`-safe via `total_cmp`.
#[derive(Clone)]
struct Scored(f64, VectorId);

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Scored {}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

pub struct HnswIndex {
    dimension: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ml_max: usize,
    ef_search: Option<usize>,
    metric: Metric,
    state: RwLock<GraphState>,
    rng: Mutex<StdRng>,
}

impl HnswIndex {
    pub fn new(dimension: usize, config: HnswConfig) -> Result<Self> {
        let metric = Metric::from_name(&config.metric)?;
        Ok(Self {
            dimension,
            m: config.m,
            m_max0: config.m * 2,
            ef_construction: config.ef_construction,
            ml_max: config.ml_max,
            ef_search: config.ef_search,
            metric,
            state: RwLock::new(GraphState {
                nodes: HashMap::new(),
                entry_point: None,
                max_layer: 0,
            }),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample_l_top(&self) -> usize {
        let u: f64 = {
            let mut rng = self.rng.lock();
            // Uniform(0,1], never exactly 0 so ln(u) is finite.
            1.0 - rng.gen_range(0.0..1.0)
        };
        let sampled = (-u.ln() * self.m as f64).floor() as i64;
        sampled.max(0) as usize
    }

    /// Rejects a duplicate id with `DuplicateId` (§4.6 step 1); otherwise
    /// links the new node into every layer `0..=l_top` it participates in.
    pub fn insert(&self, id: VectorId, vector: Vec<f64>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut state = self.state.write();
        if state.nodes.contains_key(&id) {
            return Err(StoreError::DuplicateId);
        }

        let l_top = self.sample_l_top().min(self.ml_max);
        let new_node = Node {
            vector: vector.clone(),
            neighbors: (0..=l_top).map(|_| HashSet::new()).collect(),
        };

        let Some(entry_point) = state.entry_point.clone() else {
            state.nodes.insert(id.clone(), new_node);
            state.entry_point = Some(id);
            state.max_layer = l_top;
            return Ok(());
        };

        let max_layer = state.max_layer;
        let mut curr = entry_point;
        for layer in (l_top + 1..=max_layer).rev() {
            curr = self.greedy_descend(&state, curr, &vector, layer);
        }

        let mut promoted: Vec<(usize, Vec<VectorId>)> = Vec::new();
        for layer in (0..=l_top.min(max_layer)).rev() {
            let candidates = self.search_layer(&state, &vector, curr.clone(), self.ef_construction, layer);
            let m_l = if layer == 0 { self.m_max0 } else { self.m };
            let chosen = select_neighbors(&candidates, m_l);
            if let Some(best) = chosen.first() {
                curr = best.clone();
            }
            promoted.push((layer, chosen));
        }

        state.nodes.insert(id.clone(), new_node);

        for (layer, chosen) in promoted {
            for neighbor_id in &chosen {
                state
                    .nodes
                    .get_mut(&id)
                    .expect("just inserted")
                    .neighbors[layer]
                    .insert(neighbor_id.clone());
                state
                    .nodes
                    .get_mut(neighbor_id)
                    .expect("candidate came from the graph")
                    .neighbors[layer]
                    .insert(id.clone());
                let m_l = if layer == 0 { self.m_max0 } else { self.m };
                self.shrink_neighbor(&mut state, neighbor_id, layer, m_l);
            }
        }

        if l_top > state.max_layer {
            state.max_layer = l_top;
            state.entry_point = Some(id);
        }

        Ok(())
    }

    /// Re-prunes `neighbor_id`'s edge set at `layer` down to its `m_l`
    /// nearest neighbors if a new edge just pushed it past the bound. The
    /// reference implementation skips this step entirely; left unfixed,
    /// node degree grows without limit and search quality and memory both
    /// degrade (§9 "Neighbor-set shrinking").
    fn shrink_neighbor(&self, state: &mut GraphState, neighbor_id: &VectorId, layer: usize, m_l: usize) {
        let Some(node) = state.nodes.get(neighbor_id) else { return };
        if node.neighbors[layer].len() <= m_l {
            return;
        }
        let vector = node.vector.clone();
        let scored: Vec<Scored> = node.neighbors[layer]
            .iter()
            .filter_map(|other_id| {
                state
                    .nodes
                    .get(other_id)
                    .map(|other| Scored(self.metric.distance(&vector, &other.vector), other_id.clone()))
            })
            .collect();
        let kept = select_neighbors(&scored, m_l);
        let kept: HashSet<VectorId> = kept.into_iter().collect();
        state.nodes.get_mut(neighbor_id).unwrap().neighbors[layer] = kept;
    }

    /// Greedy hill-climb at a single layer with `ef=1`: repeatedly move to
    /// the neighbor of `curr` closest to `query`, stopping when no neighbor
    /// improves on `curr` itself.
    fn greedy_descend(&self, state: &GraphState, start: VectorId, query: &[f64], layer: usize) -> VectorId {
        let mut curr = start;
        let mut curr_dist = self.metric.distance(query, &state.nodes[&curr].vector);
        loop {
            let mut improved = false;
            if let Some(node) = state.nodes.get(&curr) {
                if layer < node.neighbors.len() {
                    for neighbor_id in &node.neighbors[layer] {
                        let d = self.metric.distance(query, &state.nodes[neighbor_id].vector);
                        if d < curr_dist {
                            curr_dist = d;
                            curr = neighbor_id.clone();
                            improved = true;
                        }
                    }
                }
            }
            if !improved {
                return curr;
            }
        }
    }

    /// Beam search at a single layer (§4.6 `search_layer`): a min-heap of
    /// unexplored candidates and a bounded max-heap of the best `ef` results
    /// found so far, kept as two separate structures per §9's corrected
    /// design (the reference implementation uses one heap for both roles).
    fn search_layer(&self, state: &GraphState, query: &[f64], entry: VectorId, ef: usize, layer: usize) -> Vec<Scored> {
        use std::cmp::Reverse;

        let entry_dist = self.metric.distance(query, &state.nodes[&entry].vector);
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
        let mut results: BinaryHeap<Scored> = BinaryHeap::new();
        let mut visited: HashSet<VectorId> = HashSet::new();

        candidates.push(Reverse(Scored(entry_dist, entry.clone())));
        results.push(Scored(entry_dist, entry.clone()));
        visited.insert(entry);

        while let Some(Reverse(Scored(dist, id))) = candidates.pop() {
            let worst = results.peek().map(|s| s.0).unwrap_or(f64::INFINITY);
            if dist > worst && results.len() >= ef {
                break;
            }
            let Some(node) = state.nodes.get(&id) else { continue };
            if layer >= node.neighbors.len() {
                continue;
            }
            for neighbor_id in &node.neighbors[layer] {
                if visited.contains(neighbor_id) {
                    continue;
                }
                visited.insert(neighbor_id.clone());
                let nd = self.metric.distance(query, &state.nodes[neighbor_id].vector);
                let worst = results.peek().map(|s| s.0).unwrap_or(f64::INFINITY);
                if results.len() < ef || nd < worst {
                    candidates.push(Reverse(Scored(nd, neighbor_id.clone())));
                    results.push(Scored(nd, neighbor_id.clone()));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Greedy-descends from the entry point down to layer 0, then runs a
    /// bounded beam search there (§4.6 "Search").
    pub fn search(&self, query: &[f64], k: usize) -> Vec<(VectorId, f64)> {
        let state = self.state.read();
        let Some(entry_point) = state.entry_point.clone() else {
            return Vec::new();
        };
        let mut curr = entry_point;
        for layer in (1..=state.max_layer).rev() {
            curr = self.greedy_descend(&state, curr, query, layer);
        }
        let ef = self.ef_search.map_or(k, |floor| k.max(floor));
        let results = self.search_layer(&state, query, curr, ef, 0);
        results.into_iter().take(k).map(|Scored(d, id)| (id, d)).collect()
    }
}

/// Returns the `m` smallest-distance candidates, ascending (§4.6
/// `select_neighbors`: simple-nearest selection, no diversity heuristic).
fn select_neighbors(candidates: &[Scored], m: usize) -> Vec<VectorId> {
    let mut sorted: Vec<&Scored> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    sorted.into_iter().take(m).map(|s| s.1.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(dimension: usize) -> HnswIndex {
        HnswIndex::new(dimension, HnswConfig { m: 4, ef_construction: 32, ..Default::default() }).unwrap()
    }

    #[test]
    fn empty_index_search_is_empty() {
        let idx = index(3);
        assert!(idx.search(&[0.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let idx = index(3);
        let err = idx.insert(VectorId::from("a"), vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn rejects_duplicate_id() {
        let idx = index(2);
        idx.insert(VectorId::from("a"), vec![1.0, 2.0]).unwrap();
        assert!(matches!(idx.insert(VectorId::from("a"), vec![3.0, 4.0]), Err(StoreError::DuplicateId)));
    }

    #[test]
    fn self_query_returns_zero_distance() {
        // k=1 alone searches with ef=1 (the default floor is k itself); a
        // wider floor makes an exact self-match reliable to find.
        let idx = HnswIndex::new(4, HnswConfig { m: 4, ef_construction: 32, ef_search: Some(50), ..Default::default() }).unwrap();
        let vectors: Vec<(VectorId, Vec<f64>)> = (0..50)
            .map(|i| {
                let v = vec![
                    (i * 3 % 17) as f64,
                    (i * 5 % 13) as f64,
                    (i * 7 % 11) as f64,
                    (i * 11 % 19) as f64,
                ];
                (VectorId::from(format!("v{i}")), v)
            })
            .collect();
        for (id, v) in &vectors {
            idx.insert(id.clone(), v.clone()).unwrap();
        }
        for (id, v) in &vectors {
            let results = idx.search(v, 1);
            assert_eq!(results[0].0, *id);
            assert!(results[0].1.abs() < 1e-9);
        }
    }

    #[test]
    fn knn_results_are_sorted_ascending() {
        let idx = index(4);
        for i in 0..100 {
            let v = vec![(i % 7) as f64, (i % 5) as f64, (i % 3) as f64, i as f64];
            idx.insert(VectorId::from(format!("v{i}")), v).unwrap();
        }
        let query = vec![1.0, 2.0, 0.0, 50.0];
        let results = idx.search(&query, 10);
        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn neighbor_edges_are_symmetric_after_several_inserts() {
        let idx = index(3);
        for i in 0..30 {
            let v = vec![(i % 5) as f64, (i % 3) as f64, i as f64];
            idx.insert(VectorId::from(format!("v{i}")), v).unwrap();
        }
        let state = idx.state.read();
        for (id, node) in &state.nodes {
            for (layer, neighbors) in node.neighbors.iter().enumerate() {
                for neighbor_id in neighbors {
                    let neighbor = &state.nodes[neighbor_id];
                    assert!(
                        layer < neighbor.neighbors.len() && neighbor.neighbors[layer].contains(id),
                        "edge {id:?}->{neighbor_id:?} at layer {layer} is not symmetric"
                    );
                }
            }
        }
    }

    #[test]
    fn node_present_in_layer_l_is_present_in_all_lower_layers() {
        let idx = index(2);
        for i in 0..40 {
            idx.insert(VectorId::from(format!("v{i}")), vec![i as f64, (i * 2) as f64]).unwrap();
        }
        let state = idx.state.read();
        for node in state.nodes.values() {
            assert_eq!(node.neighbors.len(), node.l_top() + 1);
        }
    }
}
