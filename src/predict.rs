//! Batch scoring of an inference table.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::ScoredRecord;
use crate::registry::{ArtifactSource, ModelSelection};
use crate::table;

#[derive(Debug)]
pub struct PredictionOutcome {
    pub selection: String,
    pub output_path: PathBuf,
    pub scored: Vec<ScoredRecord>,
}

impl PredictionOutcome {
    pub fn anomaly_count(&self) -> usize {
        self.scored.iter().filter(|r| r.is_anomaly()).count()
    }
}

/// Score `input` (default `data.inference_path`) with every model and write the
/// results file into `output_dir` (default `data.output_dir`).
pub fn run_prediction(
    config: &AppConfig,
    input: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<PredictionOutcome> {
    let input = input.unwrap_or(&config.data.inference_path);
    let output_dir = output_dir.unwrap_or(&config.data.output_dir);

    let snapshot = ArtifactStore::from_config(config).load_snapshot()?;
    let records = table::read_records(input, &config.features)?;
    let selection = ModelSelection::All;
    let scored = snapshot.score(&records, &selection)?;

    let output_path = output_dir.join(table::results_file_name(selection.label(), Utc::now()));
    table::write_results(&output_path, &scored)?;

    let outcome = PredictionOutcome {
        selection: selection.label().to_string(),
        output_path,
        scored,
    };
    info!(
        records = outcome.scored.len(),
        anomalies = outcome.anomaly_count(),
        path = %outcome.output_path.display(),
        "prediction complete"
    );
    Ok(outcome)
}
