use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::ScoredRecord;

/// Score distribution and anomaly counts for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    pub algorithm: String,
    pub threshold: f64,
    pub anomalies: usize,
    pub total: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl ModelSummary {
    pub fn anomaly_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.anomalies as f64 / self.total as f64 * 100.0
        }
    }
}

/// Per-model summaries. `models` holds `(name, algorithm, threshold)` in the
/// order the models appear on the scored records.
pub fn summarize_models(
    scored: &[ScoredRecord],
    models: &[(String, String, f64)],
) -> Vec<ModelSummary> {
    models
        .iter()
        .enumerate()
        .map(|(index, (name, algorithm, threshold))| {
            let scores = model_scores(scored, index);
            let anomalies = scored
                .iter()
                .filter(|r| r.models.get(index).is_some_and(|(_, s)| s.is_anomaly))
                .count();
            let mut sorted = scores.clone();
            sorted.sort_by(f64::total_cmp);
            ModelSummary {
                name: name.clone(),
                algorithm: algorithm.clone(),
                threshold: *threshold,
                anomalies,
                total: scores.len(),
                min: sorted.first().copied().unwrap_or(0.0),
                max: sorted.last().copied().unwrap_or(0.0),
                mean: if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                },
                median: median_of_sorted(&sorted),
            }
        })
        .collect()
}

pub fn model_scores(scored: &[ScoredRecord], index: usize) -> Vec<f64> {
    scored
        .iter()
        .filter_map(|r| r.models.get(index).map(|(_, s)| s.score))
        .collect()
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 0 => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
        n => sorted[n / 2],
    }
}

/// Pearson correlation; `None` when either series is constant or lengths differ.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        None
    } else {
        Some(cov / denom)
    }
}

pub fn build_report(
    source: &str,
    generated_at: DateTime<Utc>,
    scored: &[ScoredRecord],
    summaries: &[ModelSummary],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# CX Anomaly Evaluation Report");
    let _ = writeln!(
        output,
        "Generated {} from {} ({} records)",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        source,
        scored.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Models");

    if summaries.is_empty() {
        let _ = writeln!(output, "No models were evaluated.");
    } else {
        for summary in summaries {
            let _ = writeln!(
                output,
                "- {} ({}): {} anomalies ({:.2}%), threshold {:.4}",
                summary.name,
                summary.algorithm,
                summary.anomalies,
                summary.anomaly_rate(),
                summary.threshold
            );
            let _ = writeln!(
                output,
                "  - scores min {:.4}, max {:.4}, mean {:.4}, median {:.4}",
                summary.min, summary.max, summary.mean, summary.median
            );
        }
    }

    let ensemble_flags: Vec<bool> = scored
        .iter()
        .filter_map(|r| r.ensemble.map(|e| e.is_anomaly))
        .collect();
    if !ensemble_flags.is_empty() {
        let flagged = ensemble_flags.iter().filter(|f| **f).count();
        let _ = writeln!(output);
        let _ = writeln!(output, "## Ensemble");
        let _ = writeln!(
            output,
            "- {} anomalies ({:.2}%) flagged by at least one model",
            flagged,
            flagged as f64 / ensemble_flags.len() as f64 * 100.0
        );
    }

    if summaries.len() >= 2 {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Agreement");
        match pearson(&model_scores(scored, 0), &model_scores(scored, 1)) {
            Some(r) => {
                let _ = writeln!(
                    output,
                    "- Pearson correlation between {} and {} scores: {:.4}",
                    summaries[0].name, summaries[1].name, r
                );
            }
            None => {
                let _ = writeln!(output, "- Correlation undefined (constant scores).");
            }
        }
    }

    output
}
