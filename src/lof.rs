//! Local Outlier Factor over brute-force Euclidean k-nearest neighbours.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Algorithm;
use crate::detector::AnomalyModel;
use crate::error::{Error, Result};
use crate::pipeline::FeatureMatrix;

const DENSITY_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Neighbor {
    index: usize,
    distance: f64,
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn by_distance_then_index(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.index.cmp(&b.index))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    n_neighbors: usize,
    train: FeatureMatrix,
    k_distance: Vec<f64>,
    lrd: Vec<f64>,
    training_scores: Vec<f64>,
}

impl LocalOutlierFactor {
    pub fn fit(x: &FeatureMatrix, n_neighbors: usize) -> Result<Self> {
        let n = x.n_rows();
        if n < 2 {
            return Err(Error::InsufficientData(format!(
                "local outlier factor needs at least 2 rows, got {n}"
            )));
        }
        if n_neighbors == 0 {
            return Err(Error::Config("n_neighbors must be positive".to_string()));
        }
        let k = if n_neighbors > n - 1 {
            warn!(requested = n_neighbors, rows = n, "n_neighbors exceeds training rows, clamping");
            n - 1
        } else {
            n_neighbors
        };

        let neighborhoods: Vec<Vec<Neighbor>> = (0..n)
            .into_par_iter()
            .map(|i| nearest(x, x.row(i), k, Some(i)))
            .collect();

        let k_distance: Vec<f64> = neighborhoods
            .iter()
            .map(|hood| hood.last().map_or(0.0, |nb| nb.distance))
            .collect();
        let lrd: Vec<f64> = neighborhoods
            .iter()
            .map(|hood| reachability_density(hood, &k_distance))
            .collect();
        let training_scores = neighborhoods
            .iter()
            .zip(&lrd)
            .map(|(hood, own)| outlier_factor(hood, &lrd, *own))
            .collect();

        debug!(rows = n, k, "fitted local outlier factor");
        Ok(Self {
            n_neighbors: k,
            train: x.clone(),
            k_distance,
            lrd,
            training_scores,
        })
    }

    /// Effective neighbourhood size after clamping.
    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Leave-self-out LOF of every training row, in training order.
    pub fn training_scores(&self) -> &[f64] {
        &self.training_scores
    }
}

impl AnomalyModel for LocalOutlierFactor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::LocalOutlierFactor
    }

    fn n_features(&self) -> usize {
        self.train.n_features()
    }

    fn score_samples(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        if x.n_features() != self.n_features() {
            return Err(Error::DimensionMismatch {
                expected: self.n_features(),
                actual: x.n_features(),
            });
        }
        Ok(x
            .rows()
            .map(|query| {
                let hood = nearest(&self.train, query, self.n_neighbors, None);
                let own = reachability_density(&hood, &self.k_distance);
                outlier_factor(&hood, &self.lrd, own)
            })
            .collect())
    }
}

/// The `k` training rows closest to `query`, ties broken by row index.
fn nearest(train: &FeatureMatrix, query: &[f64], k: usize, exclude: Option<usize>) -> Vec<Neighbor> {
    let mut candidates: Vec<Neighbor> = train
        .rows()
        .enumerate()
        .filter(|(index, _)| Some(*index) != exclude)
        .map(|(index, row)| Neighbor {
            index,
            distance: euclidean(query, row),
        })
        .collect();
    candidates.sort_unstable_by(by_distance_then_index);
    candidates.truncate(k);
    candidates
}

fn reachability_density(hood: &[Neighbor], k_distance: &[f64]) -> f64 {
    let mean_reach = hood
        .iter()
        .map(|nb| k_distance[nb.index].max(nb.distance))
        .sum::<f64>()
        / hood.len() as f64;
    1.0 / (mean_reach + DENSITY_EPSILON)
}

fn outlier_factor(hood: &[Neighbor], lrd: &[f64], own: f64) -> f64 {
    hood.iter().map(|nb| lrd[nb.index] / own).sum::<f64>() / hood.len() as f64
}
