//! Synthetic interaction data for demos and tests.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::models::InteractionRecord;

#[derive(Debug, Clone, Copy)]
pub struct MockOptions {
    pub normal: usize,
    pub anomalous: usize,
    pub seed: u64,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            normal: 930,
            anomalous: 70,
            seed: 42,
        }
    }
}

/// Value ranges for one kind of bad interaction.
struct AnomalyProfile {
    csat: (f64, f64),
    ies: (f64, f64),
    complaints: &'static [f64],
    aht: (f64, f64),
    hold: (f64, f64),
    transfers: &'static [f64],
}

const POOR_CSAT: AnomalyProfile = AnomalyProfile {
    csat: (1.0, 2.5),
    ies: (30.0, 55.0),
    complaints: &[1.0, 2.0, 2.0, 3.0],
    aht: (400.0, 650.0),
    hold: (60.0, 150.0),
    transfers: &[1.0, 1.0, 2.0, 2.0, 3.0],
};

const HIGH_AHT: AnomalyProfile = AnomalyProfile {
    csat: (2.5, 3.5),
    ies: (40.0, 60.0),
    complaints: &[1.0, 2.0],
    aht: (600.0, 900.0),
    hold: (100.0, 200.0),
    transfers: &[2.0, 2.0, 3.0, 3.0, 4.0],
};

const MULTIPLE_ISSUES: AnomalyProfile = AnomalyProfile {
    csat: (1.5, 2.8),
    ies: (25.0, 50.0),
    complaints: &[2.0, 2.0, 3.0, 3.0, 4.0],
    aht: (550.0, 800.0),
    hold: (120.0, 220.0),
    transfers: &[2.0, 3.0, 3.0, 4.0],
};

/// Normal and anomalous interactions shuffled together, ids `int_0001..`.
/// Identical options always produce identical records.
pub fn generate_records(options: &MockOptions) -> Vec<InteractionRecord> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let start = NaiveDate::from_ymd_opt(2025, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
        .unwrap_or_default();

    let mut records = Vec::with_capacity(options.normal + options.anomalous);
    for i in 0..options.normal {
        let day = start + Duration::days((i / 50) as i64);
        records.push(normal_record(&mut rng, day));
    }
    for i in 0..options.anomalous {
        let day = start + Duration::days((i / 3) as i64);
        records.push(anomalous_record(&mut rng, day));
    }

    records.shuffle(&mut rng);
    for (i, record) in records.iter_mut().enumerate() {
        record.interaction_id = format!("int_{:04}", i + 1);
    }
    records
}

fn normal_record(rng: &mut StdRng, day: DateTime<Utc>) -> InteractionRecord {
    InteractionRecord {
        timestamp: Some(business_hours(rng, day)),
        csat: Some(round1(gaussian(rng, 4.2, 0.5).clamp(1.0, 5.0))),
        ies: Some(round1(gaussian(rng, 78.0, 10.0).clamp(0.0, 100.0))),
        complaints: Some(if rng.gen_bool(0.1) { 1.0 } else { 0.0 }),
        aht_seconds: Some(gaussian(rng, 320.0, 80.0).max(120.0).trunc()),
        hold_time_seconds: Some(gaussian(rng, 35.0, 20.0).max(0.0).trunc()),
        transfers: Some(if rng.gen_bool(0.125) { 1.0 } else { 0.0 }),
        channel: Some(pick(rng, &[("voice", 0.6), ("chat", 0.3), ("email", 0.1)])),
        language: Some(pick(rng, &[("en", 0.6), ("es", 0.2), ("fr", 0.1), ("de", 0.1)])),
        queue: Some(pick(rng, &[("billing", 0.4), ("support", 0.5), ("sales", 0.1)])),
        ..InteractionRecord::new("")
    }
}

fn anomalous_record(rng: &mut StdRng, day: DateTime<Utc>) -> InteractionRecord {
    let profile = match rng.gen_range(0..3) {
        0 => &POOR_CSAT,
        1 => &HIGH_AHT,
        _ => &MULTIPLE_ISSUES,
    };
    let (csat, ies, aht, hold) = (profile.csat, profile.ies, profile.aht, profile.hold);

    InteractionRecord {
        timestamp: Some(business_hours(rng, day)),
        csat: Some(round1(rng.gen_range(csat.0..csat.1))),
        ies: Some(round1(rng.gen_range(ies.0..ies.1))),
        complaints: profile.complaints.choose(rng).copied(),
        aht_seconds: Some(rng.gen_range(aht.0..aht.1).trunc()),
        hold_time_seconds: Some(rng.gen_range(hold.0..hold.1).trunc()),
        transfers: profile.transfers.choose(rng).copied(),
        channel: Some(pick(rng, &[("voice", 0.7), ("chat", 0.25), ("email", 0.05)])),
        language: Some(pick(rng, &[("en", 0.6), ("es", 0.2), ("fr", 0.1), ("de", 0.1)])),
        queue: Some(pick(rng, &[("billing", 0.5), ("support", 0.45), ("sales", 0.05)])),
        ..InteractionRecord::new("")
    }
}

fn gaussian(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std * z
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn business_hours(rng: &mut StdRng, day: DateTime<Utc>) -> DateTime<Utc> {
    day + Duration::seconds(rng.gen_range(8 * 3600..18 * 3600))
}

fn pick(rng: &mut StdRng, weighted: &[(&str, f64)]) -> String {
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0.0..total);
    for (value, weight) in weighted {
        if roll < *weight {
            return value.to_string();
        }
        roll -= weight;
    }
    weighted.last().map(|(v, _)| v.to_string()).unwrap_or_default()
}
