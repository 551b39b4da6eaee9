//! Isolation Forest.
//!
//! Anomalies are isolated by fewer random splits, so they land at shallower
//! depths. Trees are grown from per-tree seeds drawn from one master seed, which
//! keeps the forest reproducible even though trees are built in parallel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Algorithm, ModelParams};
use crate::detector::AnomalyModel;
use crate::error::{Error, Result};
use crate::pipeline::FeatureMatrix;

const EULER_GAMMA: f64 = 0.5772156649;

/// Expected path length of an unsuccessful BST search over `n` points, `c(n)`.
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    /// Defaults to `ceil(log2(subsample size))`.
    pub max_depth: Option<usize>,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            max_depth: None,
            seed: 42,
        }
    }
}

impl From<&ModelParams> for IsolationForestParams {
    fn from(params: &ModelParams) -> Self {
        Self {
            n_estimators: params.n_estimators,
            max_samples: params.max_samples,
            max_depth: params.max_depth,
            seed: params.random_state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One isolation tree stored as an arena; the root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build<R: Rng>(x: &FeatureMatrix, rows: &[usize], max_depth: usize, rng: &mut R) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, rows, 0, max_depth, rng);
        tree
    }

    fn grow<R: Rng>(
        &mut self,
        x: &FeatureMatrix,
        rows: &[usize],
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if depth >= max_depth || rows.len() <= 1 {
            return index;
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..x.n_features())
            .filter_map(|feature| {
                let (min, max) = rows.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &r| {
                        let v = x.row(r)[feature];
                        (lo.min(v), hi.max(v))
                    },
                );
                let mid = min + (max - min) / 2.0;
                (mid > min && mid < max).then_some((feature, min, max))
            })
            .collect();
        if candidates.is_empty() {
            return index;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let mut threshold = min + (max - min) * rng.gen::<f64>();
        if threshold <= min || threshold >= max {
            threshold = min + (max - min) / 2.0;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| x.row(r)[feature] < threshold);
        let left = self.grow(x, &left_rows, depth + 1, max_depth, rng);
        let right = self.grow(x, &right_rows, depth + 1, max_depth, rng);
        self.nodes[index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    /// Depth at which `sample` lands plus `c(leaf size)`.
    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut index = 0;
        let mut depth = 0usize;
        loop {
            match &self.nodes[index] {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if sample[*feature] < *threshold { *left } else { *right };
                    depth += 1;
                }
            }
        }
    }

    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: IsolationForestParams,
    n_features: usize,
    sample_size: usize,
    max_depth: usize,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    pub fn fit(x: &FeatureMatrix, params: &IsolationForestParams) -> Result<Self> {
        let n = x.n_rows();
        if n < 2 {
            return Err(Error::InsufficientData(format!(
                "isolation forest needs at least 2 rows, got {n}"
            )));
        }
        if params.n_estimators == 0 || params.max_samples == 0 {
            return Err(Error::Config(
                "n_estimators and max_samples must be positive".to_string(),
            ));
        }

        let sample_size = params.max_samples.min(n);
        let max_depth = params
            .max_depth
            .unwrap_or_else(|| (sample_size as f64).log2().ceil() as usize)
            .max(1);

        let mut master = StdRng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.gen()).collect();

        let trees: Vec<IsolationTree> = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let rows = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::build(x, &rows, max_depth, &mut rng)
            })
            .collect();

        debug!(
            trees = trees.len(),
            sample_size,
            max_depth,
            "built isolation forest"
        );

        Ok(Self {
            params: params.clone(),
            n_features: x.n_features(),
            sample_size,
            max_depth,
            trees,
        })
    }

    pub fn params(&self) -> &IsolationForestParams {
        &self.params
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn score_row(&self, sample: &[f64]) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(sample))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path_length(self.sample_size))
    }
}

impl AnomalyModel for IsolationForest {
    fn algorithm(&self) -> Algorithm {
        Algorithm::IsolationForest
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    /// `2^(-E[h(x)] / c(psi))`, in (0, 1]; higher is more anomalous.
    fn score_samples(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        if x.n_features() != self.n_features {
            return Err(Error::DimensionMismatch {
                expected: self.n_features,
                actual: x.n_features(),
            });
        }
        Ok(x.rows().map(|row| self.score_row(row)).collect())
    }
}
