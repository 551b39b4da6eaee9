//! CSV input and output.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::config::FeatureConfig;
use crate::error::{Error, Result};
use crate::models::{InteractionRecord, ScoredRecord};

/// Read interaction records, failing fast when a required column is absent.
pub fn read_records(path: &Path, features: &FeatureConfig) -> Result<Vec<InteractionRecord>> {
    info!(path = %path.display(), "loading CSV");
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let missing: Vec<String> = features
        .required_columns()
        .into_iter()
        .filter(|column| !headers.iter().any(|h| h == column))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Schema { missing });
    }

    let records = reader
        .deserialize::<InteractionRecord>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    info!(rows = records.len(), columns = headers.len(), "loaded CSV");
    Ok(records)
}

pub fn write_records(path: &Path, records: &[InteractionRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(rows = records.len(), path = %path.display(), "saved CSV");
    Ok(())
}

/// `anomalies_<selection>_<yyyymmdd_HHMMSS>.csv`
pub fn results_file_name(selection: &str, at: DateTime<Utc>) -> String {
    format!("anomalies_{}_{}.csv", selection, at.format("%Y%m%d_%H%M%S"))
}

/// Write scored records. The timestamp column appears when any record has one;
/// ensemble columns appear when the records carry an ensemble verdict.
pub fn write_results(path: &Path, scored: &[ScoredRecord]) -> Result<()> {
    ensure_parent(path)?;
    let with_timestamp = scored.iter().any(|r| r.timestamp.is_some());
    let with_ensemble = scored.first().is_some_and(|r| r.ensemble.is_some());
    let model_names: Vec<&str> = scored
        .first()
        .map(|r| r.models.iter().map(|(name, _)| name.as_str()).collect())
        .unwrap_or_default();

    let mut header: Vec<String> = Vec::new();
    if with_timestamp {
        header.push("timestamp".to_string());
    }
    header.push("interaction_id".to_string());
    for name in &model_names {
        header.push(format!("{name}_score"));
        header.push(format!("{name}_anomaly"));
    }
    if with_ensemble {
        header.push("ensemble_score".to_string());
        header.push("ensemble_anomaly".to_string());
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;
    for record in scored {
        let mut row: Vec<String> = Vec::with_capacity(header.len());
        if with_timestamp {
            row.push(
                record
                    .timestamp
                    .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
            );
        }
        row.push(record.interaction_id.clone());
        for (_, result) in &record.models {
            row.push(result.score.to_string());
            row.push(flag(result.is_anomaly).to_string());
        }
        if with_ensemble {
            match &record.ensemble {
                Some(ensemble) => {
                    row.push(ensemble.score.to_string());
                    row.push(flag(ensemble.is_anomaly).to_string());
                }
                None => row.extend([String::new(), String::new()]),
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!(rows = scored.len(), path = %path.display(), "saved results");
    Ok(())
}

pub(crate) fn flag(is_anomaly: bool) -> u8 {
    u8::from(is_anomaly)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE_YAML;
    use crate::config::AppConfig;
    use crate::models::{EnsembleResult, ScoreResult};
    use chrono::TimeZone;

    fn features() -> FeatureConfig {
        AppConfig::from_yaml_str(SAMPLE_YAML).unwrap().features
    }

    #[test]
    fn reads_records_with_blank_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(
            &path,
            "timestamp,interaction_id,csat,ies,complaints,aht_seconds,hold_time_seconds,transfers,channel,language,queue,agent\n\
             2025-10-15T10:00:00Z,a1,4.5,80,0,300,30,0,voice,en,billing,x\n\
             ,a2,,65,1,450,,1,,es,support,y\n",
        )
        .unwrap();
        let records = read_records(&path, &features()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].csat, None);
        assert_eq!(records[1].timestamp, None);
        assert_eq!(records[1].categorical("channel"), Some(None));
        assert_eq!(records[0].aht_seconds, Some(300.0));
    }

    #[test]
    fn missing_required_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(
            &path,
            "interaction_id,csat,ies,complaints,aht_seconds,hold_time_seconds,channel,language,queue\n\
             a1,4.5,80,0,300,30,voice,en,billing\n",
        )
        .unwrap();
        match read_records(&path, &features()) {
            Err(Error::Schema { missing }) => assert_eq!(missing, vec!["transfers"]),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn padded_headers_still_fill_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(
            &path,
            "interaction_id, csat, ies, complaints, aht_seconds, hold_time_seconds, transfers, channel, language, queue\n\
             a1, 4.5, 80, 0, 300, 30, 0, voice, en, billing\n",
        )
        .unwrap();
        let records = read_records(&path, &features()).unwrap();
        assert_eq!(records[0].interaction_id, "a1");
        assert_eq!(records[0].csat, Some(4.5));
        assert_eq!(records[0].aht_seconds, Some(300.0));
        assert_eq!(records[0].categorical("channel"), Some(Some("voice")));
        assert_eq!(records[0].categorical("queue"), Some(Some("billing")));
    }

    #[test]
    fn results_file_layout() {
        let at = Utc.with_ymd_and_hms(2025, 10, 15, 9, 30, 5).unwrap();
        assert_eq!(results_file_name("both", at), "anomalies_both_20251015_093005.csv");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(results_file_name("both", at));
        let scored = vec![ScoredRecord {
            interaction_id: "a1".to_string(),
            timestamp: Some(at),
            models: vec![
                ("iforest".to_string(), ScoreResult { score: 0.61, is_anomaly: true }),
                ("lof".to_string(), ScoreResult { score: 1.02, is_anomaly: false }),
            ],
            ensemble: Some(EnsembleResult { score: 0.4, is_anomaly: true }),
        }];
        write_results(&path, &scored).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,interaction_id,iforest_score,iforest_anomaly,lof_score,lof_anomaly,ensemble_score,ensemble_anomaly")
        );
        assert_eq!(lines.next(), Some("2025-10-15T09:30:05Z,a1,0.61,1,1.02,0,0.4,1"));
    }

    #[test]
    fn single_model_results_have_no_ensemble_or_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.csv");
        let scored = vec![ScoredRecord {
            interaction_id: "a1".to_string(),
            timestamp: None,
            models: vec![("lof".to_string(), ScoreResult { score: 1.5, is_anomaly: true })],
            ensemble: None,
        }];
        write_results(&path, &scored).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("interaction_id,lof_score,lof_anomaly"));
    }

    #[test]
    fn written_records_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock.csv");
        let mut record = InteractionRecord::new("int_0001");
        record.csat = Some(4.1);
        record.aht_seconds = Some(310.0);
        record.ies = Some(70.0);
        record.complaints = Some(0.0);
        record.hold_time_seconds = Some(20.0);
        record.transfers = Some(0.0);
        record.channel = Some("chat".to_string());
        record.language = Some("en".to_string());
        record.queue = Some("sales".to_string());
        write_records(&path, &[record.clone()]).unwrap();
        assert_eq!(read_records(&path, &features()).unwrap(), vec![record]);
    }
}
