mod common;

use cx_anomaly_detector::artifacts::ArtifactStore;
use cx_anomaly_detector::evaluate::run_evaluation;
use cx_anomaly_detector::predict::run_prediction;
use cx_anomaly_detector::registry::{ArtifactSource, ModelSelection};
use cx_anomaly_detector::table;
use cx_anomaly_detector::train::run_training;
use cx_anomaly_detector::Error;

#[test]
fn train_predict_evaluate_round() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    let training = common::records(930, 70, 42);
    table::write_records(&config.data.train_path, &training).unwrap();
    table::write_records(&config.data.inference_path, &common::records(475, 25, 7)).unwrap();

    let trained = run_training(&config).unwrap();
    assert_eq!(trained.models.len(), 2);

    // p90 thresholds flag roughly a tenth of the training table.
    let snapshot = ArtifactStore::from_config(&config).load_snapshot().unwrap();
    let scored = snapshot.score(&training, &ModelSelection::All).unwrap();
    for (index, name) in ["iforest", "lof"].iter().enumerate() {
        let flagged = scored.iter().filter(|r| r.models[index].1.is_anomaly).count();
        assert!(
            (70..=130).contains(&flagged),
            "{name} flagged {flagged} of {}",
            scored.len()
        );
    }
    let ensemble_flagged = scored.iter().filter(|r| r.is_anomaly()).count();
    let max_single = (0..2)
        .map(|i| scored.iter().filter(|r| r.models[i].1.is_anomaly).count())
        .max()
        .unwrap();
    assert!(ensemble_flagged >= max_single);
    assert!(scored
        .iter()
        .all(|r| r.ensemble.is_some_and(|e| (0.0..=1.0).contains(&e.score))));

    // Obvious outliers rank above the typical interaction.
    let heavy: Vec<usize> = training
        .iter()
        .enumerate()
        .filter(|(_, r)| r.aht_seconds.unwrap_or(0.0) >= 600.0 && r.transfers.unwrap_or(0.0) >= 2.0)
        .map(|(i, _)| i)
        .collect();
    assert!(!heavy.is_empty());
    let heavy_flagged = heavy.iter().filter(|i| scored[**i].is_anomaly()).count();
    assert!(heavy_flagged * 10 >= heavy.len() * 7, "{heavy_flagged}/{}", heavy.len());

    let outcome = run_prediction(&config, None, None).unwrap();
    assert_eq!(outcome.scored.len(), 500);
    assert_eq!(outcome.selection, "both");
    let file_name = outcome.output_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("anomalies_both_") && file_name.ends_with(".csv"));
    let content = std::fs::read_to_string(&outcome.output_path).unwrap();
    assert!(content.starts_with(
        "timestamp,interaction_id,iforest_score,iforest_anomaly,lof_score,lof_anomaly,ensemble_score,ensemble_anomaly"
    ));
    assert_eq!(content.lines().count(), 501);

    let evaluation = run_evaluation(&config).unwrap();
    let report = std::fs::read_to_string(&evaluation.report_path).unwrap();
    assert!(report.contains("## Models"));
    assert!(report.contains("Pearson correlation between iforest and lof"));
    assert_eq!(evaluation.summaries.len(), 2);
}

#[test]
fn training_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    let a = common::train_and_save(&config, 3);
    let b = common::train_and_save(&config, 3);
    for (left, right) in a.models.iter().zip(&b.models) {
        assert_eq!(left.detector, right.detector);
        assert_eq!(left.metadata.threshold, right.metadata.threshold);
    }
}

#[test]
fn prediction_without_artifacts_names_the_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    table::write_records(&config.data.inference_path, &common::records(10, 0, 1)).unwrap();
    match run_prediction(&config, None, None) {
        Err(Error::MissingArtifact { path }) => assert!(path.ends_with("preprocessor.json")),
        other => panic!("expected missing artifact, got {other:?}"),
    }
}

#[test]
fn schema_error_fails_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    common::train_and_save(&config, 2);
    let input = dir.path().join("narrow.csv");
    std::fs::write(&input, "interaction_id,csat\na1,4.0\n").unwrap();
    assert!(matches!(
        run_prediction(&config, Some(&input), None),
        Err(Error::Schema { .. })
    ));
}
