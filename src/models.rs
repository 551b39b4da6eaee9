use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const NUMERIC_COLUMNS: &[&str] = &[
    "csat",
    "ies",
    "complaints",
    "aht_seconds",
    "hold_time_seconds",
    "transfers",
];

pub const CATEGORICAL_COLUMNS: &[&str] = &["channel", "language", "queue"];

pub const IDENTIFIER_COLUMNS: &[&str] = &["interaction_id", "timestamp"];

/// One customer-service interaction as ingested from a table or request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub interaction_id: String,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub csat: Option<f64>,
    #[serde(default)]
    pub ies: Option<f64>,
    #[serde(default)]
    pub complaints: Option<f64>,
    #[serde(default)]
    pub aht_seconds: Option<f64>,
    #[serde(default)]
    pub hold_time_seconds: Option<f64>,
    #[serde(default)]
    pub transfers: Option<f64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
}

impl InteractionRecord {
    pub fn new(interaction_id: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            timestamp: None,
            csat: None,
            ies: None,
            complaints: None,
            aht_seconds: None,
            hold_time_seconds: None,
            transfers: None,
            channel: None,
            language: None,
            queue: None,
        }
    }

    /// Value of a numeric column; `None` for unknown column names.
    pub fn numeric(&self, column: &str) -> Option<Option<f64>> {
        let value = match column {
            "csat" => self.csat,
            "ies" => self.ies,
            "complaints" => self.complaints,
            "aht_seconds" => self.aht_seconds,
            "hold_time_seconds" => self.hold_time_seconds,
            "transfers" => self.transfers,
            _ => return None,
        };
        // NaN arrives from some CSV exports; treat it as missing.
        Some(value.filter(|v| !v.is_nan()))
    }

    /// Value of a categorical column; `None` for unknown column names.
    pub fn categorical(&self, column: &str) -> Option<Option<&str>> {
        let value = match column {
            "channel" => self.channel.as_deref(),
            "language" => self.language.as_deref(),
            "queue" => self.queue.as_deref(),
            _ => return None,
        };
        Some(value.map(str::trim).filter(|v| !v.is_empty()))
    }

    /// Checks metric bounds: csat in [1, 5], ies in [0, 100], counts and durations >= 0.
    pub fn validate(&self) -> Result<()> {
        if self.interaction_id.trim().is_empty() {
            return Err(self.invalid("interaction_id must not be empty"));
        }
        if let Some(csat) = self.csat.filter(|v| !v.is_nan()) {
            if !(1.0..=5.0).contains(&csat) {
                return Err(self.invalid(&format!("csat {csat} outside [1, 5]")));
            }
        }
        if let Some(ies) = self.ies.filter(|v| !v.is_nan()) {
            if !(0.0..=100.0).contains(&ies) {
                return Err(self.invalid(&format!("ies {ies} outside [0, 100]")));
            }
        }
        for column in ["complaints", "aht_seconds", "hold_time_seconds", "transfers"] {
            if let Some(Some(value)) = self.numeric(column) {
                if value < 0.0 || value.is_infinite() {
                    return Err(self.invalid(&format!("{column} must be non-negative, got {value}")));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::Validation {
            interaction_id: self.interaction_id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// One model's verdict for one record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub is_anomaly: bool,
}

/// Fused verdict across models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub score: f64,
    pub is_anomaly: bool,
}

/// All results for one record, in the snapshot's model order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub interaction_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub models: Vec<(String, ScoreResult)>,
    pub ensemble: Option<EnsembleResult>,
}

impl ScoredRecord {
    /// Ensemble flag when present, otherwise whether any model flagged the record.
    pub fn is_anomaly(&self) -> bool {
        match &self.ensemble {
            Some(ensemble) => ensemble.is_anomaly,
            None => self.models.iter().any(|(_, r)| r.is_anomaly),
        }
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

mod flexible_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("unable to parse timestamp: {raw}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 10, 15)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap()
            .and_utc();
        assert_eq!(parse_timestamp("2025-10-15T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-10-15 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-10-15T10:00:00"), Some(expected));
        assert!(parse_timestamp("2025-10-15").is_some());
        assert!(parse_timestamp("15/10/2025").is_none());
    }

    #[test]
    fn deserializes_partial_json_record() {
        let record: InteractionRecord = serde_json::from_str(
            r#"{"interaction_id": "abc-123", "timestamp": "2025-10-15T10:00:00Z",
                "csat": 3.2, "channel": "voice"}"#,
        )
        .unwrap();
        assert_eq!(record.csat, Some(3.2));
        assert_eq!(record.ies, None);
        assert_eq!(record.categorical("channel"), Some(Some("voice")));
        assert_eq!(record.categorical("queue"), Some(None));
        assert_eq!(record.numeric("sentiment"), None);
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let result: std::result::Result<InteractionRecord, _> =
            serde_json::from_str(r#"{"interaction_id": "a", "timestamp": "yesterday"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn validates_metric_bounds() {
        let mut record = InteractionRecord::new("abc-123");
        record.csat = Some(4.5);
        record.ies = Some(80.0);
        assert!(record.validate().is_ok());

        record.csat = Some(6.0);
        let err = record.validate().unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("csat"));

        record.csat = Some(4.0);
        record.transfers = Some(-1.0);
        assert!(record.validate().is_err());
    }

    #[test]
    fn ensemble_flag_takes_precedence() {
        let scored = ScoredRecord {
            interaction_id: "a".to_string(),
            timestamp: None,
            models: vec![(
                "iforest".to_string(),
                ScoreResult {
                    score: 0.7,
                    is_anomaly: true,
                },
            )],
            ensemble: None,
        };
        assert!(scored.is_anomaly());
    }
}
