//! REST surface — task triggers, run inspection, the approval endpoints,
//! and read-only views over mail, summaries and sent records.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::approval::ApprovalGate;
use crate::engine::{Orchestrator, TaskKind};
use crate::error::{ApprovalError, DatabaseError, Error, ValidationError};
use crate::model::Tone;

/// Shared state for all API routes.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Orchestrator>,
    pub gate: Arc<ApprovalGate>,
}

/// Engine error wrapped for HTTP status mapping.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Approval(ApprovalError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Approval(ApprovalError::MissingTone { .. }) => StatusCode::BAD_REQUEST,
            Error::Approval(_) => StatusCode::CONFLICT,
            Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Capability(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "API request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ── Tasks and runs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TaskRequest {
    task: String,
    /// Fetch lower bound for `sync` (defaults to today, UTC).
    since_date: Option<NaiveDate>,
    /// Target day for `daily_summary` (defaults to today, UTC).
    date: Option<NaiveDate>,
    /// Target item for `analyze` and `reply`.
    mail_id: Option<i64>,
}

/// POST /api/tasks
///
/// Trigger a task. Responds with the resulting run record, which for a
/// `sync` that produced suggestions will be suspended awaiting approval.
async fn create_task(
    State(state): State<ApiState>,
    Json(req): Json<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = TaskKind::parse(&req.task)
        .ok_or_else(|| Error::Validation(ValidationError::UnknownTask(req.task.clone())))?;

    let run = match task {
        TaskKind::Sync => {
            let since = req.since_date.unwrap_or_else(|| Utc::now().date_naive());
            state.engine.process_new_mail(since).await?
        }
        TaskKind::DailySummary => {
            let date = req.date.unwrap_or_else(|| Utc::now().date_naive());
            state.engine.daily_summary(date).await?
        }
        TaskKind::Analyze => {
            let mail_id = req
                .mail_id
                .ok_or(Error::Validation(ValidationError::MissingParameter("mail_id")))?;
            state.engine.analyze_item(mail_id).await?
        }
        TaskKind::Reply => {
            let mail_id = req
                .mail_id
                .ok_or(Error::Validation(ValidationError::MissingParameter("mail_id")))?;
            state.engine.draft_replies(mail_id).await?
        }
        // Sends go through the approval gate, not the task endpoint.
        TaskKind::Send => {
            return Err(Error::Validation(ValidationError::UnsupportedTask {
                task: req.task,
                reason: "sends are driven by the approval gate",
            })
            .into());
        }
    };
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /api/runs/{id}
async fn get_run(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state
        .engine
        .store()
        .get_run(id)
        .await
        .map_err(Error::from)?
        .ok_or(Error::Database(DatabaseError::NotFound {
            entity: "run".into(),
            id: id.to_string(),
        }))?;
    Ok(Json(run))
}

// ── Mail ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListMailParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    /// Only items that have been classified.
    #[serde(default)]
    analyzed: bool,
}

fn default_limit() -> usize {
    50
}

/// GET /api/mail
async fn list_mail(
    State(state): State<ApiState>,
    Query(params): Query<ListMailParams>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .engine
        .store()
        .list_mail(params.limit.min(500), params.offset, params.analyzed)
        .await
        .map_err(Error::from)?;
    Ok(Json(items))
}

/// GET /api/mail/{id}
async fn get_mail(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .engine
        .store()
        .get_mail_item(id)
        .await
        .map_err(Error::from)?
        .ok_or(Error::Database(DatabaseError::NotFound {
            entity: "mail_item".into(),
            id: id.to_string(),
        }))?;
    Ok(Json(item))
}

// ── Suggestions / approval gate ─────────────────────────────────────

/// GET /api/suggestions/{id}
///
/// Soft expiry applies: a pending suggestion past retention comes back
/// rejected.
async fn get_suggestion(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let suggestion = state.gate.get(id).await?;
    Ok(Json(suggestion))
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    tone: Tone,
    /// Replacement body; when present the draft is sent as edited.
    body: Option<String>,
}

/// POST /api/suggestions/{id}/approve
async fn approve_suggestion(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.gate.approve(id, req.tone, req.body).await?;
    Ok(Json(run))
}

/// POST /api/suggestions/{id}/reject
async fn reject_suggestion(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.reject(id).await?;
    Ok(Json(json!({ "status": "rejected" })))
}

// ── Summaries and sent records ──────────────────────────────────────

/// GET /api/summary/{date}
async fn get_summary(
    State(state): State<ApiState>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let date: NaiveDate = date.parse().map_err(|e: chrono::ParseError| {
        Error::Validation(ValidationError::InvalidDate {
            value: date.clone(),
            message: e.to_string(),
        })
    })?;
    let summary = state
        .engine
        .store()
        .get_daily_summary(date)
        .await
        .map_err(Error::from)?
        .ok_or(Error::Database(DatabaseError::NotFound {
            entity: "daily_summary".into(),
            id: date.to_string(),
        }))?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ListSentParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

/// GET /api/sent
async fn list_sent(
    State(state): State<ApiState>,
    Query(params): Query<ListSentParams>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .engine
        .store()
        .list_sent_records(params.limit.min(500))
        .await
        .map_err(Error::from)?;
    Ok(Json(records))
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Build the full API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", post(create_task))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/mail", get(list_mail))
        .route("/api/mail/{id}", get(get_mail))
        .route("/api/suggestions/{id}", get(get_suggestion))
        .route("/api/suggestions/{id}/approve", post(approve_suggestion))
        .route("/api/suggestions/{id}/reject", post(reject_suggestion))
        .route("/api/summary/{date}", get(get_summary))
        .route("/api/sent", get(list_sent))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
