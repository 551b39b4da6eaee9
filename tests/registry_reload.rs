mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use cx_anomaly_detector::artifacts::{ArtifactStore, TrainedArtifacts};
use cx_anomaly_detector::models::ScoredRecord;
use cx_anomaly_detector::registry::{ArtifactSource, ModelRegistry, ModelSelection, RegistrySnapshot};
use cx_anomaly_detector::{Error, Result};

/// Alternates between two trained generations on every load.
struct AlternatingSource {
    generations: Vec<TrainedArtifacts>,
    loads: AtomicUsize,
}

impl ArtifactSource for AlternatingSource {
    fn load_snapshot(&self) -> Result<RegistrySnapshot> {
        let index = self.loads.fetch_add(1, Ordering::SeqCst) % self.generations.len();
        let trained = self.generations[index].clone();
        RegistrySnapshot::new(
            trained.pipeline,
            trained.models,
            Default::default(),
            Some(trained.global),
        )
    }
}

fn flatten(scored: &[ScoredRecord]) -> Vec<(String, f64, bool)> {
    scored
        .iter()
        .flat_map(|r| {
            r.models
                .iter()
                .map(|(name, s)| (format!("{}:{}", r.interaction_id, name), s.score, s.is_anomaly))
        })
        .collect()
}

#[test]
fn concurrent_scores_never_mix_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    let first = cx_anomaly_detector::train::train_models(&config, &common::records(150, 10, 1)).unwrap();
    let second = cx_anomaly_detector::train::train_models(&config, &common::records(150, 10, 2)).unwrap();

    let registry = Arc::new(ModelRegistry::new(AlternatingSource {
        generations: vec![first, second],
        loads: AtomicUsize::new(0),
    }));
    let probe = common::records(20, 5, 99);

    // Reference output of each generation.
    let gen_a = flatten(&registry.load().unwrap().score(&probe, &ModelSelection::All).unwrap());
    let gen_b = flatten(&registry.reload().unwrap().score(&probe, &ModelSelection::All).unwrap());
    assert_ne!(gen_a, gen_b);

    let stop = Arc::new(AtomicBool::new(false));
    let reloader = {
        let registry = Arc::clone(&registry);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut reloads = 0;
            while !stop.load(Ordering::SeqCst) {
                registry.reload().unwrap();
                reloads += 1;
            }
            reloads
        })
    };

    let scorers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let probe = probe.clone();
            let (gen_a, gen_b) = (gen_a.clone(), gen_b.clone());
            thread::spawn(move || {
                for _ in 0..25 {
                    let (_, scored) = registry.score(&probe, "both").unwrap();
                    let seen = flatten(&scored);
                    assert!(seen == gen_a || seen == gen_b, "scores mixed two snapshots");
                    assert!(scored.iter().all(|r| r.ensemble.is_some()));
                }
            })
        })
        .collect();

    for scorer in scorers {
        scorer.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    assert!(reloader.join().unwrap() > 0);
}

#[test]
fn captured_snapshot_outlives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    common::train_and_save(&config, 4);
    let registry = ModelRegistry::new(ArtifactStore::from_config(&config));

    let before = registry.load().unwrap();
    let threshold_before = before.models()[0].metadata.threshold;

    let mut retrained = config.clone();
    retrained.models[0].params.random_state = 1234;
    common::train_and_save(&retrained, 5);
    let after = registry.reload().unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.models()[0].metadata.threshold, threshold_before);
    assert_ne!(after.models()[0].metadata.threshold, threshold_before);
    // The old snapshot still scores on its own artifacts.
    before
        .score(&common::records(3, 0, 8), &ModelSelection::All)
        .unwrap();
}

#[test]
fn reload_failure_keeps_serving_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    common::train_and_save(&config, 6);
    let store = ArtifactStore::from_config(&config);
    let registry = ModelRegistry::new(store.clone());
    let loaded = registry.load().unwrap();

    std::fs::remove_file(store.model_path("iforest")).unwrap();
    assert!(matches!(registry.reload(), Err(Error::MissingArtifact { .. })));
    assert!(Arc::ptr_eq(&loaded, &registry.snapshot().unwrap()));
    registry.score(&common::records(5, 1, 3), "iforest").unwrap();
}
