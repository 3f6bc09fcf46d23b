//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::core::error::CodeShiftError;
use crate::storage::models::{Direction, EdgeKind, GraphNodeKind, JobState, ProjectStatus, SearchMode};

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

// ==================== Response Types ====================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub completion: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ProjectSummary {
    pub id: i64,
    pub name: String,
    pub source_language: String,
    pub source_framework: Option<String>,
    pub status: ProjectStatus,
}

#[derive(Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub state: JobState,
}

// ==================== Request Types ====================

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub root_path: String,
    pub source_language: String,
    #[serde(default)]
    pub source_framework: Option<String>,
}

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Deserialize)]
pub struct ConvertRequest {
    pub target_language: String,
    #[serde(default)]
    pub target_framework: Option<String>,
}

#[derive(Deserialize)]
pub struct SymbolsQuery {
    pub query: String,
    /// `name` (default) or `snippet`
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Deserialize)]
pub struct NeighborsQuery {
    /// Comma-separated edge kinds, all kinds when absent
    #[serde(default)]
    pub kinds: Option<String>,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_direction() -> String {
    "both".to_string()
}

fn default_depth() -> u32 {
    1
}

// ==================== Errors ====================

/// HTTP status for each error kind
pub fn status_code(err: &CodeShiftError) -> StatusCode {
    match err {
        CodeShiftError::ProjectNotFound(_) | CodeShiftError::JobNotFound(_) | CodeShiftError::NodeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        CodeShiftError::ProjectNotParsed(_) | CodeShiftError::JobNotComplete(_) => StatusCode::CONFLICT,
        CodeShiftError::ProjectBusy(_) => StatusCode::LOCKED,
        CodeShiftError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CodeShiftError::ParseError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CodeShiftError::CompletionService(_) => StatusCode::BAD_GATEWAY,
        CodeShiftError::Storage(_) | CodeShiftError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: CodeShiftError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_code(&err);
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.kind().to_string(),
            message: err.to_string(),
        }),
    )
}

fn invalid(message: String) -> (StatusCode, Json<ErrorResponse>) {
    error_response(CodeShiftError::InvalidRequest(message))
}

// ==================== Handlers ====================

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        completion: state.shift.completion_name().to_string(),
    })
}

/// List all projects
pub async fn list_projects(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let projects = state.shift.list_projects().await.map_err(error_response)?;
    let summaries: Vec<ProjectSummary> = projects
        .into_iter()
        .map(|p| ProjectSummary {
            id: p.id,
            name: p.name,
            source_language: p.source_language,
            source_framework: p.source_framework,
            status: p.status,
        })
        .collect();
    Ok(Json(summaries))
}

/// Register a new project
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .shift
        .register_project(
            &req.name,
            std::path::Path::new(&req.root_path),
            &req.source_language,
            req.source_framework.as_deref(),
        )
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// Get project details
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let overview = state.shift.get_project(id).await.map_err(error_response)?;
    Ok(Json(overview))
}

/// Delete a project and everything it owns
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.shift.delete_project(id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Parse a project
pub async fn parse_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.shift.parse_project(id).await.map_err(error_response)?;
    Ok(Json(outcome))
}

/// Ask a question about a parsed project
pub async fn ask_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AskRequest>,
) -> ApiResult<impl IntoResponse> {
    let answer = state
        .shift
        .ask_question(id, &req.question)
        .await
        .map_err(error_response)?;
    Ok(Json(answer))
}

/// Recorded questions and answers
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let turns = state.shift.chat_history(id).await.map_err(error_response)?;
    Ok(Json(turns))
}

/// Search symbols by name or source text
pub async fn search_symbols(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<SymbolsQuery>,
) -> ApiResult<impl IntoResponse> {
    let mode = match params.mode.as_deref() {
        Some(mode) => mode.parse::<SearchMode>().map_err(invalid)?,
        None => SearchMode::default(),
    };
    let kind = match params.kind.as_deref() {
        Some(kind) => Some(kind.parse::<GraphNodeKind>().map_err(invalid)?),
        None => None,
    };
    let nodes = state
        .shift
        .search_symbols(id, &params.query, mode, kind, params.limit)
        .await
        .map_err(error_response)?;
    Ok(Json(nodes))
}

/// Get a node by id
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let node = state.shift.get_node(node_id).await.map_err(error_response)?;
    Ok(Json(node))
}

/// Neighborhood of a node
pub async fn neighbors(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<i64>,
    Query(params): Query<NeighborsQuery>,
) -> ApiResult<impl IntoResponse> {
    let kinds = params
        .kinds
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| k.parse::<EdgeKind>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(invalid)?;
    let direction = params.direction.parse::<Direction>().map_err(invalid)?;
    let reached = state
        .shift
        .neighbors(node_id, &kinds, direction, params.depth)
        .await
        .map_err(error_response)?;
    Ok(Json(reached))
}

/// Start a conversion job
pub async fn convert_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ConvertRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .shift
        .convert_project(id, &req.target_language, req.target_framework.as_deref())
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: job.id,
            state: job.state,
        }),
    ))
}

/// Job state and manifest
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .shift
        .get_conversion_result(&job_id)
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

/// Units of a job, converted output included
pub async fn list_units(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let units = state.shift.list_units(&job_id).await.map_err(error_response)?;
    Ok(Json(units))
}

/// Zip archive of a completed job
pub async fn download_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state
        .shift
        .download_conversion_output(&job_id)
        .await
        .map_err(error_response)?;
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"codeshift-{}.zip\"", job_id),
        ),
    ];
    Ok((headers, bytes))
}

/// Cancel a conversion job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .shift
        .cancel_conversion(&job_id)
        .await
        .map_err(error_response)?;
    Ok(Json(job))
}

/// List supported source languages
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.shift.list_languages())
}

/// Framework catalogue of a language
pub async fn list_frameworks(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let frameworks = state.shift.list_frameworks(&language).map_err(error_response)?;
    Ok(Json(frameworks))
}
