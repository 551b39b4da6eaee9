//! On-disk layout of trained artifacts.
//!
//! Everything is JSON under `artifacts.dir`: the shared feature pipeline, one
//! detector file and one metadata file per model, and `meta_global.json`.
//! Files are written to a temporary name and renamed so a concurrent reload
//! never sees a half-written artifact.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Algorithm, AppConfig, EnsembleConfig, ModelParams};
use crate::detector::{AnomalyModel, Detector};
use crate::error::{Error, Result};
use crate::models::ScoreResult;
use crate::pipeline::{FeatureMatrix, FeaturePipeline};
use crate::registry::{ArtifactSource, RegistrySnapshot};
use crate::threshold::ScoreStats;

pub const GLOBAL_META_FILE: &str = "meta_global.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub algorithm: Algorithm,
    pub train_timestamp: DateTime<Utc>,
    pub n_samples: usize,
    pub n_features: usize,
    pub threshold: f64,
    pub threshold_percentile: f64,
    pub params: ModelParams,
    pub score_stats: ScoreStats,
}

/// A fitted detector with its calibration.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub name: String,
    pub detector: Detector,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    /// Raw scores and threshold flags for every row of `x`.
    pub fn score(&self, x: &FeatureMatrix) -> Result<Vec<ScoreResult>> {
        let threshold = self.metadata.threshold;
        Ok(self
            .detector
            .score_samples(x)?
            .into_iter()
            .map(|score| ScoreResult {
                score,
                is_anomaly: score >= threshold,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalMetadata {
    pub train_timestamp: DateTime<Utc>,
    pub n_samples: usize,
    pub n_features: usize,
    pub models_trained: Vec<String>,
    pub config_snapshot: AppConfig,
}

/// Output of one training run.
#[derive(Debug, Clone)]
pub struct TrainedArtifacts {
    pub pipeline: FeaturePipeline,
    pub models: Vec<ModelArtifact>,
    pub global: GlobalMetadata,
}

/// Reads and writes artifacts for the models named in the configuration.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    preprocessor: String,
    model_template: String,
    meta_template: String,
    model_names: Vec<String>,
    ensemble: EnsembleConfig,
}

impl ArtifactStore {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dir: config.artifacts.dir.clone(),
            preprocessor: config.artifacts.preprocessor.clone(),
            model_template: config.artifacts.model_template.clone(),
            meta_template: config.artifacts.meta_template.clone(),
            model_names: config.model_names(),
            ensemble: config.ensemble.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn preprocessor_path(&self) -> PathBuf {
        self.dir.join(&self.preprocessor)
    }

    pub fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(self.model_template.replace("{name}", name))
    }

    pub fn meta_path(&self, name: &str) -> PathBuf {
        self.dir.join(self.meta_template.replace("{name}", name))
    }

    pub fn global_meta_path(&self) -> PathBuf {
        self.dir.join(GLOBAL_META_FILE)
    }

    pub fn save(&self, artifacts: &TrainedArtifacts) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.preprocessor_path();
        info!(path = %path.display(), "saving preprocessor");
        write_json(&path, &artifacts.pipeline)?;

        for model in &artifacts.models {
            let path = self.model_path(&model.name);
            info!(model = %model.name, path = %path.display(), "saving model");
            write_json(&path, &model.detector)?;
            write_json(&self.meta_path(&model.name), &model.metadata)?;
        }

        write_json(&self.global_meta_path(), &artifacts.global)?;
        info!(dir = %self.dir.display(), "all artifacts saved");
        Ok(())
    }

    pub fn load_pipeline(&self) -> Result<FeaturePipeline> {
        let path = self.preprocessor_path();
        let pipeline: FeaturePipeline = read_json(&path)?;
        if !pipeline.is_fitted() {
            return Err(Error::MalformedArtifact {
                path,
                reason: "feature pipeline was saved before fitting".to_string(),
            });
        }
        Ok(pipeline)
    }

    pub fn load_model(&self, name: &str) -> Result<ModelArtifact> {
        let model_path = self.model_path(name);
        let detector: Detector = read_json(&model_path)?;
        let metadata: ModelMetadata = read_json(&self.meta_path(name))?;
        if detector.algorithm() != metadata.algorithm || detector.n_features() != metadata.n_features {
            return Err(Error::MalformedArtifact {
                path: model_path,
                reason: format!(
                    "detector ({}, {} features) disagrees with its metadata ({}, {} features)",
                    detector.algorithm(),
                    detector.n_features(),
                    metadata.algorithm,
                    metadata.n_features
                ),
            });
        }
        Ok(ModelArtifact {
            name: name.to_string(),
            detector,
            metadata,
        })
    }

    /// Global metadata is informational; a missing file is not an error.
    pub fn load_global(&self) -> Result<Option<GlobalMetadata>> {
        match read_json(&self.global_meta_path()) {
            Ok(global) => Ok(Some(global)),
            Err(Error::MissingArtifact { path }) => {
                warn!(path = %path.display(), "global metadata not found");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl ArtifactSource for ArtifactStore {
    fn load_snapshot(&self) -> Result<RegistrySnapshot> {
        info!(dir = %self.dir.display(), models = ?self.model_names, "loading model artifacts");
        let pipeline = self.load_pipeline()?;
        let models = self
            .model_names
            .iter()
            .map(|name| self.load_model(name))
            .collect::<Result<Vec<_>>>()?;
        let global = self.load_global()?;
        RegistrySnapshot::new(pipeline, models, self.ensemble.clone(), global)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingArtifact {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    serde_json::from_str(&content).map_err(|e| Error::MalformedArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}
