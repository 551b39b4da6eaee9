//! HTTP surface over the model registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::error::Error;
use crate::models::{InteractionRecord, ScoredRecord};
use crate::registry::{ModelRegistry, ALL_MODELS};
use crate::table::flag;

pub const SERVICE_NAME: &str = "CX Anomaly Detector";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/score", post(score))
        .route("/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load artifacts, then serve until ctrl-c. A failed initial load starts the
/// service degraded; `POST /reload` can recover it.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let registry = Arc::new(ModelRegistry::new(ArtifactStore::from_config(&config)));
    let loader = Arc::clone(&registry);
    if let Err(err) = tokio::task::spawn_blocking(move || loader.load()).await? {
        warn!(error = %err, "starting without models");
    }

    let app = router(AppState { registry });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidSelection { .. } => StatusCode::BAD_REQUEST,
            Error::Validation { .. } | Error::Schema { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "endpoints": {
            "health": "GET /health",
            "models": "GET /models",
            "score": "POST /score?model=<name>|both",
            "reload": "POST /reload",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let loaded = state.registry.is_loaded();
    Json(json!({
        "status": if loaded { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "model_loaded": loaded,
        "version": VERSION,
    }))
}

async fn models(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.registry.snapshot()?;
    let models: serde_json::Map<String, serde_json::Value> = snapshot
        .models()
        .iter()
        .map(|m| {
            (
                m.name.clone(),
                json!({
                    "algorithm": m.metadata.algorithm,
                    "threshold": m.metadata.threshold,
                    "train_timestamp": m.metadata.train_timestamp,
                    "n_samples": m.metadata.n_samples,
                    "n_features": m.metadata.n_features,
                }),
            )
        })
        .collect();
    Ok(Json(json!({
        "models": models,
        "ensemble_available": snapshot.ensemble_available(),
        "loaded_at": snapshot.loaded_at(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ScoreParams {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub interaction_id: String,
    pub scores: BTreeMap<String, f64>,
    pub is_anomaly: BTreeMap<String, u8>,
}

impl From<&ScoredRecord> for AnomalyScore {
    fn from(record: &ScoredRecord) -> Self {
        let mut scores = BTreeMap::new();
        let mut is_anomaly = BTreeMap::new();
        for (name, result) in &record.models {
            scores.insert(name.clone(), result.score);
            is_anomaly.insert(name.clone(), flag(result.is_anomaly));
        }
        if let Some(ensemble) = &record.ensemble {
            scores.insert("ensemble".to_string(), ensemble.score);
            is_anomaly.insert("ensemble".to_string(), flag(ensemble.is_anomaly));
        }
        Self {
            interaction_id: record.interaction_id.clone(),
            scores,
            is_anomaly,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub scores: Vec<AnomalyScore>,
    pub total_records: usize,
    pub anomalies_detected: usize,
    pub processing_time_ms: f64,
}

async fn score(
    State(state): State<AppState>,
    Query(params): Query<ScoreParams>,
    Json(records): Json<Vec<InteractionRecord>>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let started = Instant::now();
    let selection = params.model.unwrap_or_else(|| ALL_MODELS.to_string());
    info!(records = records.len(), model = %selection, "scoring request");

    let registry = Arc::clone(&state.registry);
    let (_, scored) = tokio::task::spawn_blocking(move || registry.score(&records, &selection))
        .await
        .map_err(|e| ApiError::internal(format!("scoring task failed: {e}")))??;

    let anomalies_detected = scored.iter().filter(|r| r.is_anomaly()).count();
    Ok(Json(ScoreResponse {
        total_records: scored.len(),
        anomalies_detected,
        scores: scored.iter().map(AnomalyScore::from).collect(),
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn reload(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let registry = Arc::clone(&state.registry);
    let snapshot = tokio::task::spawn_blocking(move || registry.reload())
        .await
        .map_err(|e| ApiError::internal(format!("reload task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("failed to reload models: {e}")))?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Reloaded models: {}", snapshot.model_names().join(", ")),
    })))
}
