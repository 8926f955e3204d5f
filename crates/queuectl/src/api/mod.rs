use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::Value;

use crate::api::models::{ListJobsQuery, RetryResponse, SetConfigRequest, StatusResponse};
use crate::jobs::{
    Job, JobState, JobStore, NewJob, QueueSettings, SettingsError, SettingsRepo, StoreError,
    WorkerPool,
};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub store: JobStore,
    pub settings: SettingsRepo,
    pub pool: WorkerPool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Jobs
        .route("/jobs", get(list_jobs).post(enqueue_job))
        .route("/jobs/:id", get(get_job))
        .route("/status", get(status))
        // DLQ
        .route("/dlq", get(list_dlq))
        .route("/dlq/:id/retry", post(retry_dlq_job))
        // Settings
        .route("/config", get(get_config))
        .route("/config/:key", put(set_config))
        // Workers
        .route("/workers/stop", post(stop_workers))
        // Metrics
        .route("/metrics", get(metrics))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal_err(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {e}"),
    )
}

fn store_err(e: StoreError) -> ApiError {
    match e {
        StoreError::DuplicateId(_) => (StatusCode::CONFLICT, e.to_string()),
        StoreError::InvalidTransition { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
        other => internal_err(other),
    }
}

fn settings_err(e: SettingsError) -> ApiError {
    match e {
        SettingsError::UnknownKey(_) | SettingsError::InvalidValue { .. } => {
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        SettingsError::Store(inner) => internal_err(inner),
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let filter = match q.state.as_deref() {
        Some(raw) => Some(
            raw.parse::<JobState>()
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
        ),
        None => None,
    };

    let jobs = state.store.list(filter).await.map_err(store_err)?;
    Ok(Json(jobs))
}

pub async fn enqueue_job(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let new = NewJob::from_value(body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let job = state.store.enqueue(new).await.map_err(store_err)?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.store.get(&id).await.map_err(store_err)? {
        Some(job) => Ok(Json(job)),
        None => Err((StatusCode::NOT_FOUND, format!("job '{id}' not found"))),
    }
}

pub async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let jobs = state.store.summary().await.map_err(store_err)?;
    let dead = state.store.list_dead().await.map_err(store_err)?.len();

    Ok(Json(StatusResponse {
        jobs,
        dead,
        active_workers: state.pool.active_worker_count(),
    }))
}

pub async fn list_dlq(State(state): State<ApiState>) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state.store.list_dead().await.map_err(store_err)?;
    Ok(Json(jobs))
}

pub async fn retry_dlq_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    if !state.store.resurrect(&id).await.map_err(store_err)? {
        return Err((StatusCode::NOT_FOUND, format!("job '{id}' is not in the DLQ")));
    }

    Ok(Json(RetryResponse {
        id,
        state: JobState::Pending,
    }))
}

pub async fn get_config(State(state): State<ApiState>) -> Result<Json<QueueSettings>, ApiError> {
    let settings = state.settings.get().await.map_err(settings_err)?;
    Ok(Json(settings))
}

pub async fn set_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(body): Json<SetConfigRequest>,
) -> Result<Json<QueueSettings>, ApiError> {
    let raw = match body.value {
        Value::String(s) => s,
        other => other.to_string(),
    };

    let settings = state.settings.set(&key, &raw).await.map_err(settings_err)?;
    Ok(Json(settings))
}

pub async fn stop_workers(State(state): State<ApiState>) -> StatusCode {
    state.pool.stop_workers();
    StatusCode::ACCEPTED
}

pub async fn metrics(State(state): State<ApiState>) -> Response {
    // Minimal Prometheus text format (no extra crate needed).
    let summary = match state.store.summary().await {
        Ok(summary) => summary,
        Err(e) => return internal_err(e).into_response(),
    };
    let dead = match state.store.list_dead().await {
        Ok(dead) => dead.len(),
        Err(e) => return internal_err(e).into_response(),
    };

    let mut body = String::from(concat!(
        "# HELP queuectl_jobs Number of live jobs by state\n",
        "# TYPE queuectl_jobs gauge\n",
    ));
    for st in JobState::ALL.into_iter().filter(|s| *s != JobState::Dead) {
        let count = summary.get(&st).copied().unwrap_or(0);
        body.push_str(&format!("queuectl_jobs{{state=\"{st}\"}} {count}\n"));
    }
    body.push_str(&format!(
        concat!(
            "# HELP queuectl_dead_jobs Number of jobs in the DLQ\n",
            "# TYPE queuectl_dead_jobs gauge\n",
            "queuectl_dead_jobs {}\n",
            "# HELP queuectl_active_workers Workers currently running\n",
            "# TYPE queuectl_active_workers gauge\n",
            "queuectl_active_workers {}\n"
        ),
        dead,
        state.pool.active_worker_count()
    ));

    (StatusCode::OK, body).into_response()
}
