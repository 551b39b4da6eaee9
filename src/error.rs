use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Required columns are absent from an input table.
    #[error("input is missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    /// A record violates a field bound (e.g. csat outside [1, 5]).
    #[error("invalid record {interaction_id}: {reason}")]
    Validation {
        interaction_id: String,
        reason: String,
    },

    #[error("feature pipeline has not been fitted")]
    NotFitted,

    #[error("feature width mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing artifact: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("malformed artifact {}: {reason}", path.display())]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("models not loaded")]
    NotLoaded,

    #[error("invalid model selection '{requested}': must be one of {}", available.join(", "))]
    InvalidSelection {
        requested: String,
        available: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors caused by the caller's request rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. } | Self::Validation { .. } | Self::InvalidSelection { .. }
        )
    }

    /// Errors that should abort a training run or process start.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnsupportedAlgorithm(_) | Self::Yaml(_))
    }
}
