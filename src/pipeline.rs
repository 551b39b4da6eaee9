//! Feature pipeline: imputation, scaling and one-hot encoding.
//!
//! `fit` learns per-column statistics from training records; `transform`
//! applies them without touching the learned state. Both detectors share
//! one fitted pipeline.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{FeatureConfig, ImputeStrategy, PreprocessingConfig, ScaleMethod};
use crate::error::{Error, Result};
use crate::models::{InteractionRecord, CATEGORICAL_COLUMNS, NUMERIC_COLUMNS};

/// Category substituted for missing categorical values before encoding.
pub const MISSING_CATEGORY: &str = "missing";

/// Dense row-major matrix of transformed features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_features: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            data: Vec::new(),
        }
    }

    pub fn from_rows(n_features: usize, rows: &[Vec<f64>]) -> Result<Self> {
        let mut matrix = Self::new(n_features);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.n_features {
            return Err(Error::DimensionMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        if self.n_features == 0 {
            0
        } else {
            self.data.len() / self.n_features
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.n_features;
        &self.data[start..start + self.n_features]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.n_features.max(1))
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.n_features);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            n_features: self.n_features,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NumericColumn {
    name: String,
    fill: f64,
    offset: f64,
    scale: f64,
}

impl NumericColumn {
    fn apply(&self, value: Option<f64>) -> f64 {
        (value.unwrap_or(self.fill) - self.offset) / self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoricalColumn {
    name: String,
    vocabulary: Vec<String>,
}

/// Statistics learned by [`FeaturePipeline::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    numeric: Vec<NumericColumn>,
    categorical: Vec<CategoricalColumn>,
}

impl FittedPipeline {
    pub fn n_features(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.vocabulary.len())
                .sum::<usize>()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|c| c.name.clone()).collect();
        for column in &self.categorical {
            names.extend(column.vocabulary.iter().map(|v| format!("{}_{}", column.name, v)));
        }
        names
    }

    /// Vocabulary learned for a categorical column, if it was fitted.
    pub fn vocabulary(&self, column: &str) -> Option<&[String]> {
        self.categorical
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.vocabulary.as_slice())
    }

    fn encode(&self, record: &InteractionRecord, row: &mut Vec<f64>) {
        row.clear();
        for column in &self.numeric {
            row.push(column.apply(record.numeric(&column.name).flatten()));
        }
        for column in &self.categorical {
            let value = record
                .categorical(&column.name)
                .flatten()
                .unwrap_or(MISSING_CATEGORY);
            // Unseen values leave every indicator at zero.
            row.extend(column.vocabulary.iter().map(|v| if v.as_str() == value { 1.0 } else { 0.0 }));
        }
    }
}

/// Configured pipeline, optionally carrying its fitted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    numeric: Vec<String>,
    categorical: Vec<String>,
    strategy: ImputeStrategy,
    fill_value: f64,
    scale_method: ScaleMethod,
    fitted: Option<FittedPipeline>,
}

impl FeaturePipeline {
    pub fn new(features: &FeatureConfig, preprocessing: &PreprocessingConfig) -> Self {
        Self {
            numeric: features.numeric_features(),
            categorical: features.categorical_features(),
            strategy: preprocessing.numeric_strategy,
            fill_value: preprocessing.fill_value,
            scale_method: preprocessing.scale_method,
            fitted: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fitted(&self) -> Result<&FittedPipeline> {
        self.fitted.as_ref().ok_or(Error::NotFitted)
    }

    pub fn n_features(&self) -> Result<usize> {
        Ok(self.fitted()?.n_features())
    }

    pub fn feature_names(&self) -> Result<Vec<String>> {
        Ok(self.fitted()?.feature_names())
    }

    pub fn fit(&mut self, records: &[InteractionRecord]) -> Result<&FittedPipeline> {
        self.check_columns()?;
        if records.is_empty() {
            return Err(Error::InsufficientData(
                "cannot fit feature pipeline on an empty table".to_string(),
            ));
        }

        let numeric = self
            .numeric
            .iter()
            .map(|name| self.fit_numeric(name, records))
            .collect();
        let categorical = self
            .categorical
            .iter()
            .map(|name| fit_categorical(name, records))
            .collect();

        let fitted = FittedPipeline {
            numeric,
            categorical,
        };
        info!(
            numeric = self.numeric.len(),
            categorical = self.categorical.len(),
            width = fitted.n_features(),
            "fitted feature pipeline"
        );
        Ok(&*self.fitted.insert(fitted))
    }

    pub fn fit_transform(&mut self, records: &[InteractionRecord]) -> Result<FeatureMatrix> {
        self.fit(records)?;
        self.transform(records)
    }

    pub fn transform(&self, records: &[InteractionRecord]) -> Result<FeatureMatrix> {
        let fitted = self.fitted()?;
        let mut matrix = FeatureMatrix::new(fitted.n_features());
        let mut row = Vec::with_capacity(fitted.n_features());
        for record in records {
            fitted.encode(record, &mut row);
            matrix.push_row(&row)?;
        }
        debug!(rows = matrix.n_rows(), width = matrix.n_features(), "transformed records");
        Ok(matrix)
    }

    fn check_columns(&self) -> Result<()> {
        let missing: Vec<String> = self
            .numeric
            .iter()
            .filter(|c| !NUMERIC_COLUMNS.contains(&c.as_str()))
            .chain(
                self.categorical
                    .iter()
                    .filter(|c| !CATEGORICAL_COLUMNS.contains(&c.as_str())),
            )
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Schema { missing })
        }
    }

    fn fit_numeric(&self, name: &str, records: &[InteractionRecord]) -> NumericColumn {
        let observed: Vec<f64> = records
            .iter()
            .filter_map(|r| r.numeric(name).flatten())
            .collect();

        let fill = match self.strategy {
            ImputeStrategy::Constant => self.fill_value,
            _ if observed.is_empty() => 0.0,
            ImputeStrategy::Mean => mean(&observed),
            ImputeStrategy::Median => median(&observed),
        };

        let imputed: Vec<f64> = records
            .iter()
            .map(|r| r.numeric(name).flatten().unwrap_or(fill))
            .collect();

        let (offset, scale) = match self.scale_method {
            ScaleMethod::Standard => {
                let mu = mean(&imputed);
                let var = imputed.iter().map(|v| (v - mu).powi(2)).sum::<f64>()
                    / imputed.len() as f64;
                (mu, var.sqrt())
            }
            ScaleMethod::MinMax => {
                let min = imputed.iter().copied().fold(f64::INFINITY, f64::min);
                let max = imputed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max - min)
            }
        };

        NumericColumn {
            name: name.to_string(),
            fill,
            offset,
            scale: if scale > f64::EPSILON { scale } else { 1.0 },
        }
    }
}

fn fit_categorical(name: &str, records: &[InteractionRecord]) -> CategoricalColumn {
    let mut vocabulary: Vec<String> = records
        .iter()
        .map(|r| {
            r.categorical(name)
                .flatten()
                .unwrap_or(MISSING_CATEGORY)
                .to_string()
        })
        .collect();
    vocabulary.sort();
    vocabulary.dedup();
    CategoricalColumn {
        name: name.to_string(),
        vocabulary,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature_config() -> FeatureConfig {
        FeatureConfig {
            numeric: vec!["csat".to_string(), "ies".to_string(), "aht_seconds".to_string()],
            categorical: vec!["channel".to_string(), "language".to_string()],
            identifier_columns: vec!["interaction_id".to_string(), "timestamp".to_string()],
            drop_columns: vec![],
        }
    }

    fn record(
        id: &str,
        csat: Option<f64>,
        ies: Option<f64>,
        aht: Option<f64>,
        channel: Option<&str>,
        language: Option<&str>,
    ) -> InteractionRecord {
        InteractionRecord {
            csat,
            ies,
            aht_seconds: aht,
            channel: channel.map(str::to_string),
            language: language.map(str::to_string),
            ..InteractionRecord::new(id)
        }
    }

    fn sample_records() -> Vec<InteractionRecord> {
        vec![
            record("id1", Some(4.5), Some(80.0), Some(300.0), Some("voice"), Some("en")),
            record("id2", Some(3.2), Some(65.0), Some(450.0), Some("chat"), Some("es")),
            record("id3", None, Some(70.0), Some(350.0), Some("voice"), Some("en")),
        ]
    }

    #[test]
    fn transform_before_fit_is_invalid_state() {
        let pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        let err = pipeline.transform(&sample_records()).unwrap_err();
        assert!(matches!(err, Error::NotFitted));
    }

    #[test]
    fn width_matches_vocabulary_sizes() {
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        let matrix = pipeline.fit_transform(&sample_records()).unwrap();
        // 3 numeric + channel {chat, voice} + language {en, es}
        assert_eq!(matrix.n_features(), 7);
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(
            pipeline.feature_names().unwrap(),
            vec!["csat", "ies", "aht_seconds", "channel_chat", "channel_voice", "language_en", "language_es"]
        );
    }

    #[test]
    fn imputes_missing_values_without_nan() {
        let records = vec![
            record("a", Some(4.5), None, Some(300.0), Some("voice"), None),
            record("b", None, Some(65.0), Some(450.0), None, Some("es")),
            record("c", Some(3.2), None, Some(350.0), Some("chat"), None),
        ];
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        let matrix = pipeline.fit_transform(&records).unwrap();
        assert!(matrix.rows().flatten().all(|v| v.is_finite()));
        let fitted = pipeline.fitted().unwrap();
        assert!(fitted.vocabulary("channel").unwrap().contains(&MISSING_CATEGORY.to_string()));
    }

    #[test]
    fn standard_scaling_centers_columns() {
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        let matrix = pipeline.fit_transform(&sample_records()).unwrap();
        let aht: Vec<f64> = matrix.rows().map(|r| r[2]).collect();
        let mu = aht.iter().sum::<f64>() / aht.len() as f64;
        let var = aht.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / aht.len() as f64;
        assert!(mu.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn minmax_scaling_maps_training_range_to_unit_interval() {
        let preprocessing = PreprocessingConfig {
            scale_method: ScaleMethod::MinMax,
            ..PreprocessingConfig::default()
        };
        let mut pipeline = FeaturePipeline::new(&feature_config(), &preprocessing);
        let matrix = pipeline.fit_transform(&sample_records()).unwrap();
        let aht: Vec<f64> = matrix.rows().map(|r| r[2]).collect();
        assert_eq!(aht, vec![0.0, 1.0, 50.0 / 150.0]);
    }

    #[test]
    fn median_and_constant_strategies() {
        let records = vec![
            record("a", Some(1.0), Some(10.0), Some(100.0), None, None),
            record("b", Some(2.0), Some(20.0), Some(200.0), None, None),
            record("c", Some(5.0), Some(30.0), None, None, None),
        ];
        let preprocessing = PreprocessingConfig {
            numeric_strategy: ImputeStrategy::Median,
            scale_method: ScaleMethod::MinMax,
            ..PreprocessingConfig::default()
        };
        let mut pipeline = FeaturePipeline::new(&feature_config(), &preprocessing);
        let matrix = pipeline.fit_transform(&records).unwrap();
        // aht median of {100, 200} is 150 -> (150 - 100) / 100
        assert!((matrix.row(2)[2] - 0.5).abs() < 1e-12);

        let preprocessing = PreprocessingConfig {
            numeric_strategy: ImputeStrategy::Constant,
            fill_value: 100.0,
            scale_method: ScaleMethod::MinMax,
        };
        let mut pipeline = FeaturePipeline::new(&feature_config(), &preprocessing);
        let matrix = pipeline.fit_transform(&records).unwrap();
        assert_eq!(matrix.row(2)[2], 0.0);
    }

    #[test]
    fn unknown_category_maps_to_all_zero_indicator() {
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        pipeline.fit(&sample_records()).unwrap();

        let unseen = record("x", Some(4.0), Some(70.0), Some(300.0), Some("carrier-pigeon"), Some("en"));
        let matrix = pipeline.transform(&[unseen]).unwrap();
        assert_eq!(&matrix.row(0)[3..5], &[0.0, 0.0]);
        assert_eq!(&matrix.row(0)[5..7], &[1.0, 0.0]);
    }

    #[test]
    fn transform_does_not_mutate_fitted_state() {
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        pipeline.fit(&sample_records()).unwrap();
        let before = pipeline.clone();
        let shifted = vec![record("z", Some(1.0), Some(5.0), Some(3000.0), Some("sms"), Some("de"))];
        pipeline.transform(&shifted).unwrap();
        assert_eq!(pipeline, before);
    }

    #[test]
    fn constant_column_does_not_divide_by_zero() {
        let records = vec![
            record("a", Some(3.0), Some(50.0), Some(300.0), Some("voice"), Some("en")),
            record("b", Some(3.0), Some(50.0), Some(300.0), Some("voice"), Some("en")),
        ];
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        let matrix = pipeline.fit_transform(&records).unwrap();
        assert!(matrix.rows().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn fit_rejects_empty_table() {
        let mut pipeline = FeaturePipeline::new(&feature_config(), &PreprocessingConfig::default());
        assert!(matches!(
            pipeline.fit(&[]).unwrap_err(),
            Error::InsufficientData(_)
        ));
    }

    #[test]
    fn matrix_rejects_ragged_rows() {
        let mut matrix = FeatureMatrix::new(2);
        matrix.push_row(&[1.0, 2.0]).unwrap();
        assert!(matrix.push_row(&[1.0]).is_err());
        assert_eq!(matrix.select_rows(&[0, 0]).n_rows(), 2);
    }
}
