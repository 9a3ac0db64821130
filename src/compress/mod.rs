//! Product quantization: a trainable, lossy vector codec.
//!
//! Grounded on `original_source`'s `VectorCompressor`
//! (`slowdb/core/vector_store.py`): this module keeps the same shape —
//! per-dimension min-max normalization, one k-means codebook per subvector
//! position, argmin-L2 encoding to a `u8` index — but replaces the
//! `sklearn.cluster.MiniBatchKMeans` dependency (no Rust equivalent in the
//! teacher's stack) with a from-scratch, seeded k-means++ / Lloyd's
//! algorithm implementation, matching how the rest of this crate (e.g.
//! HNSW's level sampling) uses `rand`'s seedable RNGs for reproducibility
//! instead of reaching for an ML crate the pack doesn't otherwise use.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Tunables for `PqCompressor::new`. Defaults match the reference
/// implementation's test configuration (a small cluster count so that
/// training converges on modest fixtures).
#[derive(Clone, Debug)]
pub struct PqOptions {
    /// Number of centroids per subvector codebook. Must be `<= 256` since
    /// compressed codes are stored as a single byte per subvector.
    pub n_clusters: usize,
    /// Explicit subvector count. `None` auto-selects per §4.4 (prefer 2,
    /// fall back to 1 if the dimension is odd).
    pub n_subvectors: Option<usize>,
    /// Seed for the k-means initialization and training RNG.
    pub seed: u64,
    /// Lloyd's-algorithm iteration cap.
    pub max_iterations: usize,
}

impl Default for PqOptions {
    fn default() -> Self {
        Self {
            n_clusters: 16,
            n_subvectors: None,
            seed: 42,
            max_iterations: 25,
        }
    }
}

/// Compressed codes are one byte per subvector (§4.4), so no codebook can
/// hold more than 256 centroids.
const MAX_N_CLUSTERS: usize = 256;

fn auto_n_subvectors(dimension: usize) -> usize {
    let mut n = dimension.min(2);
    while n > 1 && dimension % n != 0 {
        n -= 1;
    }
    n.max(1)
}

#[derive(Clone, Serialize, Deserialize)]
struct PqCodebook {
    n_subvectors: usize,
    subvector_dim: usize,
    n_clusters: usize,
    /// `centroids[subvector][cluster]` is a `subvector_dim`-length point.
    centroids: Vec<Vec<Vec<f64>>>,
    min_vals: Vec<f64>,
    max_vals: Vec<f64>,
}

/// A product quantizer over fixed-`dimension` vectors. Untrained instances
/// reject `compress`/`decompress` with `CompressorNotTrained`.
pub struct PqCompressor {
    dimension: usize,
    options: PqOptions,
    codebook: Option<PqCodebook>,
}

impl PqCompressor {
    pub fn new(dimension: usize, options: PqOptions) -> Self {
        Self {
            dimension,
            options,
            codebook: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    pub fn n_subvectors(&self) -> usize {
        self.codebook
            .as_ref()
            .map(|c| c.n_subvectors)
            .unwrap_or_else(|| {
                self.options
                    .n_subvectors
                    .filter(|&n| n > 0 && self.dimension % n == 0)
                    .unwrap_or_else(|| auto_n_subvectors(self.dimension))
            })
    }

    /// Trains codebooks on `vectors` (§4.4). Requires at least
    /// `n_clusters` training vectors, and `n_clusters <= 256` since a
    /// compressed code is a single byte per subvector.
    pub fn train(&mut self, vectors: &[Vec<f64>]) -> Result<()> {
        if self.options.n_clusters > MAX_N_CLUSTERS {
            return Err(StoreError::InvalidConfig(format!(
                "n_clusters {} exceeds the {MAX_N_CLUSTERS}-centroid limit of a single-byte code",
                self.options.n_clusters
            )));
        }
        if vectors.len() < self.options.n_clusters {
            return Err(StoreError::InsufficientTraining {
                required: self.options.n_clusters,
                got: vectors.len(),
            });
        }

        let n_subvectors = self.n_subvectors();
        let subvector_dim = self.dimension / n_subvectors;

        let mut min_vals = vec![f64::INFINITY; self.dimension];
        let mut max_vals = vec![f64::NEG_INFINITY; self.dimension];
        for v in vectors {
            for (d, &x) in v.iter().enumerate() {
                min_vals[d] = min_vals[d].min(x);
                max_vals[d] = max_vals[d].max(x);
            }
        }

        let normalized: Vec<Vec<f64>> = vectors
            .iter()
            .map(|v| normalize(v, &min_vals, &max_vals))
            .collect();

        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut centroids = Vec::with_capacity(n_subvectors);
        for sub in 0..n_subvectors {
            let start = sub * subvector_dim;
            let end = start + subvector_dim;
            let subvectors: Vec<Vec<f64>> = normalized.iter().map(|v| v[start..end].to_vec()).collect();
            centroids.push(kmeans(
                &subvectors,
                self.options.n_clusters,
                self.options.max_iterations,
                &mut rng,
            ));
        }

        self.codebook = Some(PqCodebook {
            n_subvectors,
            subvector_dim,
            n_clusters: self.options.n_clusters,
            centroids,
            min_vals,
            max_vals,
        });
        Ok(())
    }

    /// Encodes `v` as one centroid index per subvector (§6 "compressed=true").
    pub fn compress(&self, v: &[f64]) -> Result<Vec<u8>> {
        let codebook = self.codebook.as_ref().ok_or(StoreError::CompressorNotTrained)?;
        let normalized = normalize(v, &codebook.min_vals, &codebook.max_vals);
        let mut codes = Vec::with_capacity(codebook.n_subvectors);
        for sub in 0..codebook.n_subvectors {
            let start = sub * codebook.subvector_dim;
            let end = start + codebook.subvector_dim;
            let sub_v = &normalized[start..end];
            let nearest = codebook.centroids[sub]
                .iter()
                .enumerate()
                .map(|(i, c)| (i, squared_distance(sub_v, c)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            codes.push(nearest as u8);
        }
        Ok(codes)
    }

    /// Decodes `codes` back into a `dimension`-length vector.
    pub fn decompress(&self, codes: &[u8]) -> Result<Vec<f64>> {
        let codebook = self.codebook.as_ref().ok_or(StoreError::CompressorNotTrained)?;
        let mut normalized = vec![0.0; self.dimension];
        for (sub, &code) in codes.iter().enumerate() {
            let start = sub * codebook.subvector_dim;
            let centroid = &codebook.centroids[sub][code as usize];
            normalized[start..start + codebook.subvector_dim].copy_from_slice(centroid);
        }
        Ok(denormalize(&normalized, &codebook.min_vals, &codebook.max_vals))
    }
}

fn normalize(v: &[f64], min_vals: &[f64], max_vals: &[f64]) -> Vec<f64> {
    v.iter()
        .enumerate()
        .map(|(d, &x)| {
            let width = max_vals[d] - min_vals[d];
            if width == 0.0 {
                0.0
            } else {
                (x - min_vals[d]) / width
            }
        })
        .collect()
}

fn denormalize(v: &[f64], min_vals: &[f64], max_vals: &[f64]) -> Vec<f64> {
    v.iter()
        .enumerate()
        .map(|(d, &x)| x * (max_vals[d] - min_vals[d]) + min_vals[d])
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ initialization followed by Lloyd's algorithm, seeded for
/// reproducibility (§4.4 "fixed random seed").
fn kmeans(data: &[Vec<f64>], k: usize, max_iterations: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let dim = data[0].len();
    let k = k.min(data.len()).max(1);
    let mut centroids = kmeans_plus_plus_init(data, k, rng);

    for _ in 0..max_iterations {
        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for point in data {
            let nearest = centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (i, squared_distance(point, c)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            counts[nearest] += 1;
            for (d, &x) in point.iter().enumerate() {
                sums[nearest][d] += x;
            }
        }
        let mut moved = false;
        for i in 0..k {
            if counts[i] == 0 {
                continue;
            }
            let new_centroid: Vec<f64> = sums[i].iter().map(|&s| s / counts[i] as f64).collect();
            if squared_distance(&new_centroid, &centroids[i]) > 1e-12 {
                moved = true;
            }
            centroids[i] = new_centroid;
        }
        if !moved {
            break;
        }
    }
    centroids
}

fn kmeans_plus_plus_init(data: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    let first = rng.gen_range(0..data.len());
    centroids.push(data[first].clone());

    while centroids.len() < k {
        let weights: Vec<f64> = data
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| squared_distance(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            let idx = rng.gen_range(0..data.len());
            centroids.push(data[idx].clone());
            continue;
        }
        let mut target = rng.gen_range(0.0..total);
        let mut chosen = data.len() - 1;
        for (i, &w) in weights.iter().enumerate() {
            if target < w {
                chosen = i;
                break;
            }
            target -= w;
        }
        centroids.push(data[chosen].clone());
    }
    centroids
}
