#![allow(dead_code)]

use std::path::Path;

use cx_anomaly_detector::artifacts::{ArtifactStore, TrainedArtifacts};
use cx_anomaly_detector::config::AppConfig;
use cx_anomaly_detector::mock::{generate_records, MockOptions};
use cx_anomaly_detector::models::InteractionRecord;
use cx_anomaly_detector::train::train_models;

pub const TEST_CONFIG: &str = r#"
features:
  numeric: [csat, ies, complaints, aht_seconds, hold_time_seconds, transfers]
  categorical: [channel, language, queue]
preprocessing:
  numeric_strategy: median
  scale_method: standard
models:
  - name: iforest
    algorithm: IsolationForest
    params:
      n_estimators: 100
      max_samples: 256
      random_state: 42
    threshold_percentile: 90
  - name: lof
    algorithm: LOF
    params:
      n_neighbors: 20
    threshold_percentile: 90
ensemble:
  weights:
    iforest: 0.5
    lof: 0.5
"#;

/// Config whose data, artifact and report paths all live under `root`.
pub fn config_in(root: &Path) -> AppConfig {
    let mut config = AppConfig::from_yaml_str(TEST_CONFIG).unwrap();
    config.validate().unwrap();
    config.data.train_path = root.join("input").join("train.csv");
    config.data.inference_path = root.join("input").join("inference.csv");
    config.data.output_dir = root.join("processed");
    config.artifacts.dir = root.join("artifacts");
    config.evaluation.report_path = root.join("processed").join("evaluation_report.md");
    config
}

pub fn records(normal: usize, anomalous: usize, seed: u64) -> Vec<InteractionRecord> {
    generate_records(&MockOptions {
        normal,
        anomalous,
        seed,
    })
}

/// Train on a small mock table and save the artifacts under `config.artifacts.dir`.
pub fn train_and_save(config: &AppConfig, seed: u64) -> TrainedArtifacts {
    let trained = train_models(config, &records(180, 20, seed)).unwrap();
    ArtifactStore::from_config(config).save(&trained).unwrap();
    trained
}
