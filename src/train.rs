//! Training: fit the pipeline, fit every configured model, calibrate thresholds.

use chrono::Utc;
use tracing::info;

use crate::artifacts::{ArtifactStore, GlobalMetadata, ModelArtifact, ModelMetadata, TrainedArtifacts};
use crate::config::AppConfig;
use crate::detector::Detector;
use crate::error::Result;
use crate::models::InteractionRecord;
use crate::pipeline::FeaturePipeline;
use crate::table;
use crate::threshold::calibrate;

pub fn train_models(config: &AppConfig, records: &[InteractionRecord]) -> Result<TrainedArtifacts> {
    for record in records {
        record.validate()?;
    }

    let mut pipeline = FeaturePipeline::new(&config.features, &config.preprocessing);
    let x = pipeline.fit_transform(records)?;
    info!(rows = x.n_rows(), width = x.n_features(), "training matrix ready");

    let mut models = Vec::with_capacity(config.models.len());
    for spec in &config.models {
        let (detector, train_scores) = Detector::fit(spec, &x)?;
        let calibration = calibrate(&train_scores, spec.threshold_percentile)?;
        let flagged = train_scores
            .iter()
            .filter(|s| **s >= calibration.threshold)
            .count();
        info!(
            model = %spec.name,
            threshold = calibration.threshold,
            percentile = spec.threshold_percentile,
            min = calibration.stats.min,
            max = calibration.stats.max,
            mean = calibration.stats.mean,
            std = calibration.stats.std,
            flagged,
            "calibrated threshold"
        );

        models.push(ModelArtifact {
            name: spec.name.clone(),
            detector,
            metadata: ModelMetadata {
                algorithm: spec.algorithm,
                train_timestamp: Utc::now(),
                n_samples: x.n_rows(),
                n_features: x.n_features(),
                threshold: calibration.threshold,
                threshold_percentile: spec.threshold_percentile,
                params: spec.params.clone(),
                score_stats: calibration.stats,
            },
        });
    }

    Ok(TrainedArtifacts {
        global: GlobalMetadata {
            train_timestamp: Utc::now(),
            n_samples: x.n_rows(),
            n_features: x.n_features(),
            models_trained: config.model_names(),
            config_snapshot: config.clone(),
        },
        pipeline,
        models,
    })
}

/// Read the training table, train, and persist artifacts.
pub fn run_training(config: &AppConfig) -> Result<TrainedArtifacts> {
    let records = table::read_records(&config.data.train_path, &config.features)?;
    let artifacts = train_models(config, &records)?;
    ArtifactStore::from_config(config).save(&artifacts)?;
    info!(models = ?config.model_names(), "training complete");
    Ok(artifacts)
}
