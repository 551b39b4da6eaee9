//! Fusion of per-model verdicts into one ensemble score.

use crate::error::{Error, Result};
use crate::models::{EnsembleResult, ScoreResult};
use crate::threshold::ScoreStats;

const RANGE_EPSILON: f64 = 1e-10;

/// One model's contribution to the ensemble.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleInput<'a> {
    pub results: &'a [ScoreResult],
    pub stats: ScoreStats,
    pub weight: f64,
}

/// Map `score` onto [0, 1] using the model's training range.
pub fn normalize(score: f64, stats: &ScoreStats) -> f64 {
    ((score - stats.min) / (stats.max - stats.min + RANGE_EPSILON)).clamp(0.0, 1.0)
}

/// Weighted sum of normalised scores; the flag is set when any model flagged the record.
pub fn combine(inputs: &[EnsembleInput<'_>]) -> Result<Vec<EnsembleResult>> {
    let Some(first) = inputs.first() else {
        return Ok(Vec::new());
    };
    let n = first.results.len();
    if let Some(bad) = inputs.iter().find(|input| input.results.len() != n) {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: bad.results.len(),
        });
    }

    Ok((0..n)
        .map(|row| {
            inputs.iter().fold(
                EnsembleResult {
                    score: 0.0,
                    is_anomaly: false,
                },
                |acc, input| {
                    let result = input.results[row];
                    EnsembleResult {
                        score: acc.score + input.weight * normalize(result.score, &input.stats),
                        is_anomaly: acc.is_anomaly || result.is_anomaly,
                    }
                },
            )
        })
        .collect())
}
