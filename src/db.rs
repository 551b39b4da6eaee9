use std::collections::BTreeMap;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::ScoredRecord;

/// Per-model score and flag as stored in `predictions.model_scores`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoredScore {
    pub score: f64,
    pub is_anomaly: bool,
}

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub fn model_scores(record: &ScoredRecord) -> BTreeMap<String, StoredScore> {
    record
        .models
        .iter()
        .map(|(name, result)| {
            (
                name.clone(),
                StoredScore {
                    score: result.score,
                    is_anomaly: result.is_anomaly,
                },
            )
        })
        .collect()
}

/// Store one prediction run and its records in a single transaction.
pub async fn persist_predictions(
    pool: &PgPool,
    selection: &str,
    scored: &[ScoredRecord],
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let anomaly_count = scored.iter().filter(|r| r.is_anomaly()).count();

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO cx_anomaly.prediction_runs (id, selection, record_count, anomaly_count)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(run_id)
    .bind(selection)
    .bind(i32::try_from(scored.len()).context("too many records for one run")?)
    .bind(i32::try_from(anomaly_count).context("too many anomalies for one run")?)
    .execute(&mut *tx)
    .await?;

    for record in scored {
        sqlx::query(
            r#"
            INSERT INTO cx_anomaly.predictions
            (id, run_id, interaction_id, occurred_at, model_scores, ensemble_score, is_anomaly)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(&record.interaction_id)
        .bind(record.timestamp)
        .bind(Json(model_scores(record)))
        .bind(record.ensemble.map(|e| e.score))
        .bind(record.is_anomaly())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(%run_id, records = scored.len(), anomalies = anomaly_count, "persisted prediction run");
    Ok(run_id)
}
