//! HTTP surface: `POST /analyze` and `GET /health`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use jdfit::{AlignError, AlignmentEngine, AlignmentResult, DocumentRole, MatchRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<AlignmentEngine>,
}

impl AppState {
    pub fn new(engine: AlignmentEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    jd_text: String,
    resume_text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchView {
    jd_chunk: String,
    resume_match: Option<String>,
    similarity: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    overall_score: f32,
    top_matches: Vec<MatchView>,
    weak_areas: Vec<MatchView>,
}

impl From<MatchRecord> for MatchView {
    fn from(record: MatchRecord) -> Self {
        Self {
            jd_chunk: record.reference.text,
            resume_match: record.candidate.map(|c| c.text),
            similarity: record.similarity,
        }
    }
}

impl From<AlignmentResult> for AnalyzeResponse {
    fn from(result: AlignmentResult) -> Self {
        Self {
            overall_score: result.overall_score,
            top_matches: result.top_matches.into_iter().map(MatchView::from).collect(),
            weak_areas: result.weak_areas.into_iter().map(MatchView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Error reply carrying a status and a human-readable `detail`.
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

impl From<AlignError> for ApiError {
    fn from(err: AlignError) -> Self {
        let detail = match &err {
            AlignError::MissingInput => "Both JD and Resume text must be provided.".to_string(),
            AlignError::NoValidContent {
                role: DocumentRole::Reference,
            } => "Job Description contains no valid text chunks.".to_string(),
            AlignError::NoValidContent {
                role: DocumentRole::Candidate,
            } => "Resume contains no valid text chunks.".to_string(),
            other => {
                tracing::error!(error = %format!("{:#}", other), "Alignment failed");
                return Self::internal(format!("Alignment failed: {}", other));
            }
        };
        Self {
            status: StatusCode::BAD_REQUEST,
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

async fn analyze(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    tracing::debug!(
        jd_chars = payload.jd_text.len(),
        resume_chars = payload.resume_text.len(),
        "Analyze request"
    );

    // Embedding inference is CPU-bound; keep it off the async workers
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        engine.analyze(&payload.jd_text, &payload.resume_text)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Alignment task failed: {}", e)))??;

    tracing::info!(
        overall_score = result.overall_score,
        top_matches = result.top_matches.len(),
        weak_areas = result.weak_areas.len(),
        "Analysis complete"
    );

    Ok(Json(result.into()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}
