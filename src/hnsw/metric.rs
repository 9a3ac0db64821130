//! Pluggable distance functions for the HNSW graph.
//!
//! Grounded on `original_source`'s `metrics.py`, which keeps a dispatcher
//! over named metric functions; kept here as a small enum implementing one
//! `DistanceMetric` trait rather than `metrics.py`'s separate
//! dispatcher-plus-`batch_distance` shape (§10.5: the batch helper is not
//! carried over, the single-pair trait is the only contractual surface).

use crate::error::{Result, StoreError};

/// A symmetric (not necessarily metric-axiom-satisfying, e.g. cosine)
/// distance function over equal-length vectors.
pub trait DistanceMetric: Send + Sync {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    Euclidean,
    Cosine,
    Manhattan,
    NegativeDot,
    Angular,
}

impl Metric {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "euclidean" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            "manhattan" => Ok(Metric::Manhattan),
            "negative_dot" => Ok(Metric::NegativeDot),
            "angular" => Ok(Metric::Angular),
            other => Err(StoreError::UnsupportedMetric(other.to_string())),
        }
    }
}

impl DistanceMetric for Metric {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Euclidean => euclidean(a, b),
            Metric::Cosine => cosine(a, b),
            Metric::Manhattan => manhattan(a, b),
            Metric::NegativeDot => -dot(a, b),
            Metric::Angular => angular(a, b),
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

fn manhattan(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / denom
}

fn angular(a: &[f64], b: &[f64]) -> f64 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 1.0;
    }
    let sim = (dot(a, b) / denom).clamp(-1.0, 1.0);
    sim.acos() / std::f64::consts::PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_self_distance_is_zero() {
        let m = Metric::Euclidean;
        assert_eq!(m.distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_orthogonal_vectors_distance_is_one() {
        let m = Metric::Cosine;
        assert!((m.distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_metric_name_is_rejected() {
        assert!(matches!(Metric::from_name("hamming"), Err(StoreError::UnsupportedMetric(_))));
    }

    #[test]
    fn angular_identical_vectors_is_zero() {
        let m = Metric::Angular;
        assert!(m.distance(&[3.0, 4.0], &[3.0, 4.0]).abs() < 1e-9);
    }
}
