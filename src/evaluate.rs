//! Re-score the training table and write a markdown comparison of the models.

use std::path::PathBuf;

use chrono::Utc;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::error::Result;
use crate::registry::{ArtifactSource, ModelSelection};
use crate::report::{self, ModelSummary};
use crate::table;

#[derive(Debug)]
pub struct EvaluationOutcome {
    pub report_path: PathBuf,
    pub summaries: Vec<ModelSummary>,
}

pub fn run_evaluation(config: &AppConfig) -> Result<EvaluationOutcome> {
    let snapshot = ArtifactStore::from_config(config).load_snapshot()?;
    let records = table::read_records(&config.data.train_path, &config.features)?;
    let scored = snapshot.score(&records, &ModelSelection::All)?;

    let models: Vec<(String, String, f64)> = snapshot
        .models()
        .iter()
        .map(|m| {
            (
                m.name.clone(),
                m.metadata.algorithm.to_string(),
                m.metadata.threshold,
            )
        })
        .collect();
    let summaries = report::summarize_models(&scored, &models);
    for summary in &summaries {
        info!(
            model = %summary.name,
            anomalies = summary.anomalies,
            pct = summary.anomaly_rate(),
            min = summary.min,
            max = summary.max,
            mean = summary.mean,
            median = summary.median,
            "evaluation summary"
        );
    }

    let source = config.data.train_path.display().to_string();
    let content = report::build_report(&source, Utc::now(), &scored, &summaries);
    let report_path = config.evaluation.report_path.clone();
    if let Some(parent) = report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&report_path, content)?;
    info!(path = %report_path.display(), "evaluation report written");

    Ok(EvaluationOutcome {
        report_path,
        summaries,
    })
}
