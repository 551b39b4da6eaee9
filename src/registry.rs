//! Serving state: the active set of fitted artifacts.
//!
//! A [`RegistrySnapshot`] is immutable once built. The registry only ever
//! swaps the `Arc` pointing at the current snapshot, so a scoring call keeps
//! using the snapshot it captured even if a reload lands mid-request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::artifacts::{GlobalMetadata, ModelArtifact};
use crate::config::EnsembleConfig;
use crate::ensemble::{combine, EnsembleInput};
use crate::error::{Error, Result};
use crate::models::{InteractionRecord, ScoreResult, ScoredRecord};
use crate::pipeline::FeaturePipeline;

pub const ALL_MODELS: &str = "both";

/// Which loaded models a scoring call should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    All,
    Single(String),
}

impl ModelSelection {
    /// Case-insensitive match against the loaded model names or `both`.
    pub fn parse(raw: &str, available: &[String]) -> Result<Self> {
        let requested = raw.trim();
        if requested.eq_ignore_ascii_case(ALL_MODELS) {
            return Ok(Self::All);
        }
        available
            .iter()
            .find(|name| name.eq_ignore_ascii_case(requested))
            .map(|name| Self::Single(name.clone()))
            .ok_or_else(|| Error::InvalidSelection {
                requested: raw.to_string(),
                available: available
                    .iter()
                    .cloned()
                    .chain(std::iter::once(ALL_MODELS.to_string()))
                    .collect(),
            })
    }

    pub fn label(&self) -> &str {
        match self {
            Self::All => ALL_MODELS,
            Self::Single(name) => name,
        }
    }
}

/// Where snapshots come from; the file-backed store in production.
pub trait ArtifactSource: Send + Sync {
    fn load_snapshot(&self) -> Result<RegistrySnapshot>;
}

#[derive(Debug)]
pub struct RegistrySnapshot {
    pipeline: FeaturePipeline,
    models: Vec<ModelArtifact>,
    ensemble: EnsembleConfig,
    global: Option<GlobalMetadata>,
    loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn new(
        pipeline: FeaturePipeline,
        models: Vec<ModelArtifact>,
        ensemble: EnsembleConfig,
        global: Option<GlobalMetadata>,
    ) -> Result<Self> {
        let width = pipeline.n_features()?;
        if models.is_empty() {
            return Err(Error::Config("snapshot needs at least one model".to_string()));
        }
        for model in &models {
            if model.metadata.n_features != width {
                return Err(Error::DimensionMismatch {
                    expected: width,
                    actual: model.metadata.n_features,
                });
            }
        }
        Ok(Self {
            pipeline,
            models,
            ensemble,
            global,
            loaded_at: Utc::now(),
        })
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn models(&self) -> &[ModelArtifact] {
        &self.models
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn global(&self) -> Option<&GlobalMetadata> {
        self.global.as_ref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn ensemble_available(&self) -> bool {
        self.models.len() > 1
    }

    pub fn selection(&self, raw: &str) -> Result<ModelSelection> {
        ModelSelection::parse(raw, &self.model_names())
    }

    /// Validate, transform and score `records` with the selected models.
    pub fn score(
        &self,
        records: &[InteractionRecord],
        selection: &ModelSelection,
    ) -> Result<Vec<ScoredRecord>> {
        for record in records {
            record.validate()?;
        }
        let selected: Vec<&ModelArtifact> = match selection {
            ModelSelection::All => self.models.iter().collect(),
            ModelSelection::Single(name) => self
                .models
                .iter()
                .filter(|m| &m.name == name)
                .collect(),
        };
        if selected.is_empty() {
            return Err(Error::InvalidSelection {
                requested: selection.label().to_string(),
                available: self.model_names(),
            });
        }

        let x = self.pipeline.transform(records)?;
        let results = selected
            .iter()
            .map(|model| model.score(&x))
            .collect::<Result<Vec<Vec<ScoreResult>>>>()?;

        for (model, scores) in selected.iter().zip(&results) {
            let flagged = scores.iter().filter(|r| r.is_anomaly).count();
            info!(
                model = %model.name,
                anomalies = flagged,
                total = scores.len(),
                pct = percent(flagged, scores.len()),
                "scored records"
            );
        }

        let ensemble = if selected.len() > 1 {
            let inputs: Vec<EnsembleInput<'_>> = selected
                .iter()
                .zip(&results)
                .map(|(model, scores)| EnsembleInput {
                    results: scores,
                    stats: model.metadata.score_stats,
                    weight: self.ensemble.weight_for(&model.name, selected.len()),
                })
                .collect();
            let fused = combine(&inputs)?;
            let flagged = fused.iter().filter(|r| r.is_anomaly).count();
            info!(
                anomalies = flagged,
                total = fused.len(),
                pct = percent(flagged, fused.len()),
                "ensemble scored records"
            );
            Some(fused)
        } else {
            None
        };

        Ok(records
            .iter()
            .enumerate()
            .map(|(row, record)| ScoredRecord {
                interaction_id: record.interaction_id.clone(),
                timestamp: record.timestamp,
                models: selected
                    .iter()
                    .zip(&results)
                    .map(|(model, scores)| (model.name.clone(), scores[row]))
                    .collect(),
                ensemble: ensemble.as_ref().map(|fused| fused[row]),
            })
            .collect())
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Holder of the current snapshot. Starts unloaded.
pub struct ModelRegistry {
    source: Box<dyn ArtifactSource>,
    current: RwLock<Option<Arc<RegistrySnapshot>>>,
    // Loads run one at a time so the last reload to finish is the newest read.
    loading: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(source: impl ArtifactSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            current: RwLock::new(None),
            loading: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current.read().clone()
    }

    pub fn snapshot(&self) -> Result<Arc<RegistrySnapshot>> {
        self.current().ok_or(Error::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Build a snapshot from the source and install it. On failure the
    /// previous snapshot, if any, stays active.
    pub fn load(&self) -> Result<Arc<RegistrySnapshot>> {
        let _loading = self.loading.lock();
        let snapshot = match self.source.load_snapshot() {
            Ok(snapshot) => Arc::new(snapshot),
            Err(err) => {
                error!(error = %err, still_serving = self.is_loaded(), "failed to load model artifacts");
                return Err(err);
            }
        };
        *self.current.write() = Some(Arc::clone(&snapshot));
        info!(
            models = ?snapshot.model_names(),
            loaded_at = %snapshot.loaded_at(),
            "model artifacts loaded"
        );
        Ok(snapshot)
    }

    pub fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        info!("reloading model artifacts");
        self.load()
    }

    /// Score against the snapshot current at call time.
    pub fn score(
        &self,
        records: &[InteractionRecord],
        selection: &str,
    ) -> Result<(Arc<RegistrySnapshot>, Vec<ScoredRecord>)> {
        let snapshot = self.snapshot()?;
        let selection = snapshot.selection(selection)?;
        let scored = snapshot.score(records, &selection)?;
        Ok((snapshot, scored))
    }
}
