//! # Pipeline API
//!
//! Endpoints driving the research pipeline: starting and revising runs,
//! restoring snapshots, history navigation and the live event stream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{delete, get, post},
    Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use utoipa::ToSchema;

use inquiry_core::state::SnapshotRecord;
use inquiry_core::swarm::{Coordinator, PipelineError, RunPlan, StageId};

use crate::SharedState;

// === Request / Response Types ===

#[derive(Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Rejections carry the coordinator's message and a matching status code
pub struct ApiError(StatusCode, String);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::Busy { .. } => StatusCode::CONFLICT,
            PipelineError::EmptyTopic
            | PipelineError::EmptyFeedback
            | PipelineError::NothingToRevise
            | PipelineError::NothingToResume
            | PipelineError::StageNeverRan(_)
            | PipelineError::Restore(_) => StatusCode::BAD_REQUEST,
            PipelineError::NoAutosave => StatusCode::NOT_FOUND,
            PipelineError::StageFailed { .. } | PipelineError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            success: false,
            message: self.1,
        };
        (self.0, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize, ToSchema)]
pub struct StartRequest {
    pub topic: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ReviseRequest {
    pub feedback: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RestartRequest {
    /// Stage id, e.g. `proposer`
    pub stage: String,
}

/// A run was claimed and is executing in the background
#[derive(Serialize, ToSchema)]
pub struct RunAccepted {
    pub success: bool,
    pub thread_id: String,
    /// First stage the run executes
    pub entry: String,
    pub iteration: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct ViewRequest {
    pub stage: String,
    pub index: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ViewResponse {
    pub stage: String,
    /// Index actually selected after clamping
    pub index: usize,
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ShareQuery {
    /// Base URL the snapshot fragment is appended to
    pub base: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ShareResponse {
    pub link: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RestoreLinkRequest {
    pub link: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RestoreRunRequest {
    pub thread_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct SnapshotResponse {
    pub key: String,
    pub thread_id: String,
    pub topic: String,
    pub stage: String,
    pub iteration: u32,
    pub updated_at: String,
}

impl From<SnapshotRecord> for SnapshotResponse {
    fn from(r: SnapshotRecord) -> Self {
        Self {
            key: r.key,
            thread_id: r.thread_id,
            topic: r.topic,
            stage: r.stage,
            iteration: r.iteration,
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ReportResponse {
    pub markdown: String,
}

#[derive(Serialize, ToSchema)]
pub struct ToolHealthResponse {
    pub available: bool,
    pub web_search: bool,
    pub local_search: bool,
}

pub fn pipeline_routes() -> Router<SharedState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/start", post(start_run))
        .route("/revise", post(revise_run))
        .route("/restart", post(restart_run))
        .route("/resume", post(resume_run))
        .route("/view", post(set_view))
        .route("/share", get(share_link))
        .route("/restore", post(restore_link))
        .route("/restore/autosave", post(restore_autosave))
        .route("/restore/run", post(restore_run))
        .route("/events", get(events))
        .route("/snapshots", get(list_snapshots))
        .route("/snapshots/:key", delete(delete_snapshot))
        .route("/report", get(get_report))
}

fn parse_stage(raw: &str) -> Result<StageId, ApiError> {
    raw.parse::<StageId>()
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Run a claimed plan in the background and answer with what was claimed
async fn spawn_run(coordinator: &Arc<Coordinator>, plan: RunPlan) -> Json<RunAccepted> {
    let state = coordinator.snapshot().await;
    let accepted = RunAccepted {
        success: true,
        thread_id: state.thread_id,
        entry: plan.entry.as_str().to_string(),
        iteration: state.iteration_number,
    };

    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        if let Err(e) = coordinator.execute(plan).await {
            tracing::warn!(error = %e, "Run ended without reaching feedback");
        }
    });
    Json(accepted)
}

// === API Handlers ===

/// Current pipeline state
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/state",
    tag = "pipeline",
    responses(
        (status = 200, description = "Full pipeline state", body = Object)
    )
)]
pub async fn get_state(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.coordinator.snapshot().await)
}

/// Start a fresh analysis
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/start",
    tag = "pipeline",
    request_body = StartRequest,
    responses(
        (status = 200, description = "Run started", body = RunAccepted),
        (status = 409, description = "A run is already in progress", body = ApiResponse)
    )
)]
pub async fn start_run(
    State(state): State<SharedState>,
    Json(req): Json<StartRequest>,
) -> ApiResult<RunAccepted> {
    let plan = state.coordinator.prepare_start(&req.topic).await?;
    Ok(spawn_run(&state.coordinator, plan).await)
}

/// Submit feedback and run the next iteration
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/revise",
    tag = "pipeline",
    request_body = ReviseRequest,
    responses(
        (status = 200, description = "Revision started", body = RunAccepted),
        (status = 409, description = "A run is already in progress", body = ApiResponse)
    )
)]
pub async fn revise_run(
    State(state): State<SharedState>,
    Json(req): Json<ReviseRequest>,
) -> ApiResult<RunAccepted> {
    let plan = state.coordinator.prepare_revision(&req.feedback).await?;
    Ok(spawn_run(&state.coordinator, plan).await)
}

/// Re-run the pipeline from a stage, keeping upstream outputs
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/restart",
    tag = "pipeline",
    request_body = RestartRequest,
    responses(
        (status = 200, description = "Restart started", body = RunAccepted),
        (status = 400, description = "Unknown stage or stage never ran", body = ApiResponse),
        (status = 409, description = "A run is already in progress", body = ApiResponse)
    )
)]
pub async fn restart_run(
    State(state): State<SharedState>,
    Json(req): Json<RestartRequest>,
) -> ApiResult<RunAccepted> {
    let stage = parse_stage(&req.stage)?;
    let plan = state.coordinator.prepare_restart(stage).await?;
    Ok(spawn_run(&state.coordinator, plan).await)
}

/// Continue an interrupted run at its first unfinished stage
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/resume",
    tag = "pipeline",
    responses(
        (status = 200, description = "Run resumed", body = RunAccepted),
        (status = 409, description = "A run is already in progress", body = ApiResponse)
    )
)]
pub async fn resume_run(State(state): State<SharedState>) -> ApiResult<RunAccepted> {
    let plan = state.coordinator.prepare_resume().await?;
    Ok(spawn_run(&state.coordinator, plan).await)
}

/// Select the history entry a stage displays
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/view",
    tag = "pipeline",
    request_body = ViewRequest,
    responses(
        (status = 200, description = "Viewed entry", body = ViewResponse)
    )
)]
pub async fn set_view(
    State(state): State<SharedState>,
    Json(req): Json<ViewRequest>,
) -> ApiResult<ViewResponse> {
    let stage = parse_stage(&req.stage)?;
    let index = state.coordinator.set_viewed(stage, req.index).await;
    let text = state.coordinator.snapshot().await.get_viewed(stage).to_string();
    Ok(Json(ViewResponse {
        stage: stage.as_str().to_string(),
        index,
        text,
    }))
}

/// Shareable link carrying the whole state
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/share",
    tag = "snapshots",
    params(
        ("base" = Option<String>, Query, description = "Base URL, defaults to the server address")
    ),
    responses(
        (status = 200, description = "Share link", body = ShareResponse)
    )
)]
pub async fn share_link(
    State(state): State<SharedState>,
    Query(query): Query<ShareQuery>,
) -> Json<ShareResponse> {
    let base = query.base.unwrap_or_else(|| state.public_url.clone());
    Json(ShareResponse {
        link: state.coordinator.share_link(&base).await,
    })
}

/// Restore a shared link; the run opens in feedback
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/restore",
    tag = "snapshots",
    request_body = RestoreLinkRequest,
    responses(
        (status = 200, description = "State restored", body = ApiResponse),
        (status = 400, description = "Link could not be decoded", body = ApiResponse)
    )
)]
pub async fn restore_link(
    State(state): State<SharedState>,
    Json(req): Json<RestoreLinkRequest>,
) -> ApiResult<ApiResponse> {
    state.coordinator.restore_from_link(&req.link).await?;
    Ok(ApiResponse::ok("State restored from link"))
}

/// Restore the record written when the last run finished
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/restore/autosave",
    tag = "snapshots",
    responses(
        (status = 200, description = "State restored", body = ApiResponse),
        (status = 404, description = "No autosave present", body = ApiResponse)
    )
)]
pub async fn restore_autosave(State(state): State<SharedState>) -> ApiResult<ApiResponse> {
    state.coordinator.restore_autosave().await?;
    Ok(ApiResponse::ok("Autosave restored"))
}

/// Restore the latest checkpoint of a run
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/restore/run",
    tag = "snapshots",
    request_body = RestoreRunRequest,
    responses(
        (status = 200, description = "State restored", body = ApiResponse),
        (status = 404, description = "No checkpoint for this run", body = ApiResponse)
    )
)]
pub async fn restore_run(
    State(state): State<SharedState>,
    Json(req): Json<RestoreRunRequest>,
) -> ApiResult<ApiResponse> {
    state.coordinator.restore_run(&req.thread_id).await?;
    Ok(ApiResponse::ok(format!("Run {} restored", req.thread_id)))
}

/// SSE stream of pipeline events
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/events",
    tag = "pipeline",
    responses(
        (status = 200, description = "Server-sent pipeline events")
    )
)]
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold((rx, Instant::now()), |(mut rx, _last_event)| async move {
        match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
            Ok(Ok(event)) => {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(data)), (rx, Instant::now())))
            }
            Ok(Err(RecvError::Lagged(skipped))) => Some((
                Ok(Event::default().comment(format!("lagged {}", skipped))),
                (rx, Instant::now()),
            )),
            Ok(Err(RecvError::Closed)) => None,
            Err(_) => Some((
                Ok(Event::default().comment("heartbeat")),
                (rx, Instant::now()),
            )),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// List stored snapshots
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/snapshots",
    tag = "snapshots",
    responses(
        (status = 200, description = "List of snapshots", body = Vec<SnapshotResponse>)
    )
)]
pub async fn list_snapshots(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SnapshotResponse>>, ApiError> {
    let Some(store) = state.coordinator.store() else {
        return Ok(Json(Vec::new()));
    };
    let records = store
        .list()
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(records.into_iter().map(SnapshotResponse::from).collect()))
}

/// Delete a stored snapshot
#[utoipa::path(
    delete,
    path = "/api/v1/pipeline/snapshots/{key}",
    tag = "snapshots",
    params(
        ("key" = String, Path, description = "Snapshot key")
    ),
    responses(
        (status = 200, description = "Snapshot deleted", body = ApiResponse),
        (status = 404, description = "Snapshot not found", body = ApiResponse)
    )
)]
pub async fn delete_snapshot(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> ApiResult<ApiResponse> {
    let removed = match state.coordinator.store() {
        Some(store) => store
            .delete(&key)
            .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
        None => false,
    };
    if removed {
        Ok(ApiResponse::ok(format!("Snapshot {} deleted", key)))
    } else {
        Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("Snapshot {} not found", key),
        ))
    }
}

/// Markdown report of the current state
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/report",
    tag = "pipeline",
    responses(
        (status = 200, description = "Markdown report", body = ReportResponse)
    )
)]
pub async fn get_report(State(state): State<SharedState>) -> Json<ReportResponse> {
    Json(ReportResponse {
        markdown: state.coordinator.report().await,
    })
}

/// Probe the tool service
#[utoipa::path(
    get,
    path = "/api/v1/tools/health",
    tag = "tools",
    responses(
        (status = 200, description = "Tool service availability", body = ToolHealthResponse)
    )
)]
pub async fn tools_health(State(state): State<SharedState>) -> Json<ToolHealthResponse> {
    let tools = &state.coordinator.config().tools;
    Json(ToolHealthResponse {
        available: state.coordinator.tools_available().await,
        web_search: tools.enable_web_search,
        local_search: tools.enable_local_search,
    })
}
