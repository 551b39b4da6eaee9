//! Common surface of the outlier detectors.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Algorithm, ModelSpec};
use crate::error::Result;
use crate::iforest::{IsolationForest, IsolationForestParams};
use crate::lof::LocalOutlierFactor;
use crate::pipeline::FeatureMatrix;

/// Trait for fitted anomaly detection models
pub trait AnomalyModel: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Width of the feature rows the model was trained on
    fn n_features(&self) -> usize;

    /// Score each row (higher = more anomalous)
    fn score_samples(&self, x: &FeatureMatrix) -> Result<Vec<f64>>;
}

/// A fitted detector of either supported kind, as stored in a model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detector {
    IsolationForest(IsolationForest),
    LocalOutlierFactor(LocalOutlierFactor),
}

impl Detector {
    /// Fit the detector described by `spec` and return it with its training scores.
    pub fn fit(spec: &ModelSpec, x: &FeatureMatrix) -> Result<(Self, Vec<f64>)> {
        info!(
            model = %spec.name,
            algorithm = %spec.algorithm,
            rows = x.n_rows(),
            width = x.n_features(),
            "training model"
        );
        match spec.algorithm {
            Algorithm::IsolationForest => {
                let forest = IsolationForest::fit(x, &IsolationForestParams::from(&spec.params))?;
                let scores = forest.score_samples(x)?;
                Ok((Self::IsolationForest(forest), scores))
            }
            Algorithm::LocalOutlierFactor => {
                let lof = LocalOutlierFactor::fit(x, spec.params.n_neighbors)?;
                let scores = lof.training_scores().to_vec();
                Ok((Self::LocalOutlierFactor(lof), scores))
            }
        }
    }

    fn inner(&self) -> &dyn AnomalyModel {
        match self {
            Self::IsolationForest(model) => model,
            Self::LocalOutlierFactor(model) => model,
        }
    }
}

impl AnomalyModel for Detector {
    fn algorithm(&self) -> Algorithm {
        self.inner().algorithm()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn score_samples(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.inner().score_samples(x)
    }
}
