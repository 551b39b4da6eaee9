//! Typed service configuration.
//!
//! Loaded once from YAML, overridden by a few environment variables and
//! validated before anything is trained or served.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{CATEGORICAL_COLUMNS, IDENTIFIER_COLUMNS, NUMERIC_COLUMNS};

/// `both` selects every model and `ensemble` names the fused score.
pub const RESERVED_MODEL_NAMES: &[&str] = &["both", "ensemble"];

pub const DEFAULT_CONFIG_PATH: &str = "./configs/config.local.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    pub features: FeatureConfig,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_path: PathBuf,
    pub inference_path: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("./data/input/mock_train.csv"),
            inference_path: PathBuf::from("./data/input/mock_inference.csv"),
            output_dir: PathBuf::from("./data/processed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub preprocessor: String,
    pub model_template: String,
    pub meta_template: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./models/artifacts"),
            preprocessor: "preprocessor.json".to_string(),
            model_template: "model_{name}.json".to_string(),
            meta_template: "meta_{name}.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default)]
    pub numeric: Vec<String>,
    #[serde(default)]
    pub categorical: Vec<String>,
    #[serde(default = "default_identifier_columns")]
    pub identifier_columns: Vec<String>,
    #[serde(default)]
    pub drop_columns: Vec<String>,
}

fn default_identifier_columns() -> Vec<String> {
    IDENTIFIER_COLUMNS.iter().map(|c| c.to_string()).collect()
}

impl FeatureConfig {
    /// Feature columns that actually feed the pipeline.
    pub fn numeric_features(&self) -> Vec<String> {
        self.filter_excluded(&self.numeric)
    }

    pub fn categorical_features(&self) -> Vec<String> {
        self.filter_excluded(&self.categorical)
    }

    /// Every column a training or inference table must carry. The timestamp
    /// is optional.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = vec!["interaction_id".to_string()];
        columns.extend(self.numeric_features());
        columns.extend(self.categorical_features());
        columns
    }

    fn filter_excluded(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .filter(|c| !self.identifier_columns.contains(c) && !self.drop_columns.contains(c))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImputeStrategy {
    #[default]
    Mean,
    Median,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScaleMethod {
    #[default]
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "minmax")]
    MinMax,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub numeric_strategy: ImputeStrategy,
    /// Used by the `constant` strategy.
    pub fill_value: f64,
    pub scale_method: ScaleMethod,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            numeric_strategy: ImputeStrategy::Mean,
            fill_value: 0.0,
            scale_method: ScaleMethod::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    IsolationForest,
    LocalOutlierFactor,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsolationForest => "IsolationForest",
            Self::LocalOutlierFactor => "LOF",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "isolationforest" | "isolation_forest" | "iforest" => Ok(Self::IsolationForest),
            "lof" | "localoutlierfactor" | "local_outlier_factor" => Ok(Self::LocalOutlierFactor),
            _ => Err(Error::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.as_str().to_string()
    }
}

/// Hyperparameters for either detector; each algorithm reads its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub max_depth: Option<usize>,
    pub random_state: u64,
    pub n_neighbors: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            max_depth: None,
            random_state: 42,
            n_neighbors: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub params: ModelParams,
    #[serde(default = "default_threshold_percentile")]
    pub threshold_percentile: f64,
}

fn default_threshold_percentile() -> f64 {
    90.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl EnsembleConfig {
    /// Weight for `name`; unconfigured models share the mass evenly.
    pub fn weight_for(&self, name: &str, model_count: usize) -> f64 {
        self.weights
            .get(name)
            .copied()
            .unwrap_or(1.0 / model_count.max(1) as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub report_path: PathBuf,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            report_path: PathBuf::from("./data/processed/evaluation_report.md"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

impl AppConfig {
    /// Load from `path`, falling back to `CONFIG_PATH` and then the default path.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        info!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("API_PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        check_known(&self.features.numeric, NUMERIC_COLUMNS, "numeric")?;
        check_known(&self.features.categorical, CATEGORICAL_COLUMNS, "categorical")?;
        check_known(&self.features.identifier_columns, IDENTIFIER_COLUMNS, "identifier")?;

        if self.features.numeric_features().is_empty()
            && self.features.categorical_features().is_empty()
        {
            return Err(Error::Config("no feature columns configured".to_string()));
        }
        if self.models.is_empty() {
            return Err(Error::Config("at least one model must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            let reserved = RESERVED_MODEL_NAMES
                .iter()
                .any(|r| model.name.eq_ignore_ascii_case(r));
            if model.name.is_empty() || reserved {
                return Err(Error::Config(format!("invalid model name '{}'", model.name)));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(Error::Config(format!("duplicate model name '{}'", model.name)));
            }
            if !(0.0..=100.0).contains(&model.threshold_percentile) {
                return Err(Error::Config(format!(
                    "{}: threshold_percentile must be within [0, 100]",
                    model.name
                )));
            }
            let params = &model.params;
            match model.algorithm {
                Algorithm::IsolationForest => {
                    if params.n_estimators == 0 || params.max_samples == 0 {
                        return Err(Error::Config(format!(
                            "{}: n_estimators and max_samples must be positive",
                            model.name
                        )));
                    }
                    if params.max_depth == Some(0) {
                        return Err(Error::Config(format!(
                            "{}: max_depth must be positive",
                            model.name
                        )));
                    }
                }
                Algorithm::LocalOutlierFactor => {
                    if params.n_neighbors == 0 {
                        return Err(Error::Config(format!(
                            "{}: n_neighbors must be positive",
                            model.name
                        )));
                    }
                }
            }
        }

        for (name, weight) in &self.ensemble.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::Config(format!(
                    "ensemble weight for '{name}' must be a non-negative number"
                )));
            }
        }

        for template in [&self.artifacts.model_template, &self.artifacts.meta_template] {
            if !template.contains("{name}") {
                return Err(Error::Config(format!(
                    "artifact template '{template}' must contain {{name}}"
                )));
            }
        }
        Ok(())
    }
}

fn check_known(columns: &[String], known: &[&str], kind: &str) -> Result<()> {
    let unknown: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| !known.contains(c))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "unknown {kind} columns: {}",
            unknown.join(", ")
        )))
    }
}
