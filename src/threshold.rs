//! Decision thresholds from training score distributions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Summary of a model's training scores, kept for ensemble normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl ScoreStats {
    pub fn from_scores(scores: &[f64]) -> Result<Self> {
        check_scores(scores)?;
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Ok(Self {
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std: var.sqrt(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub threshold: f64,
    pub percentile: f64,
    pub stats: ScoreStats,
}

/// Threshold at `percentile` of `scores`; a record is flagged when its score is >= threshold.
pub fn calibrate(scores: &[f64], percentile: f64) -> Result<Calibration> {
    let stats = ScoreStats::from_scores(scores)?;
    Ok(Calibration {
        threshold: percentile_of(scores, percentile)?,
        percentile,
        stats,
    })
}

/// Linear interpolation between order statistics at rank `p / 100 * (n - 1)`.
pub fn percentile_of(values: &[f64], percentile: f64) -> Result<f64> {
    check_scores(values)?;
    if !(0.0..=100.0).contains(&percentile) {
        return Err(Error::Config(format!(
            "percentile {percentile} outside [0, 100]"
        )));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = percentile / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Ok(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn check_scores(scores: &[f64]) -> Result<()> {
    if scores.is_empty() {
        return Err(Error::InsufficientData(
            "cannot calibrate on an empty score set".to_string(),
        ));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(Error::InsufficientData(
            "training scores contain non-finite values".to_string(),
        ));
    }
    Ok(())
}
