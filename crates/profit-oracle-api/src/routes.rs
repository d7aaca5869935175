use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::AppError;
use crate::queue::{AnalyzeRequest, QueueMetrics, RequestState, RequestStatus};

type ApiResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Serialize)]
struct AnalyzeAccepted {
    request_id: String,
    state: RequestState,
    capacity: QueueMetrics,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: QueueMetrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/analyze", post(handle_analyze))
        .route("/requests/:id", get(handle_request_status))
        .with_state(state)
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        capacity: state.queue.metrics(),
    })
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<impl IntoResponse> {
    let request_id = state.queue.submit(request)?;
    info!(%request_id, "analysis request accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeAccepted {
            request_id,
            state: RequestState::Queued,
            capacity: state.queue.metrics(),
        }),
    ))
}

async fn handle_request_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestStatus>> {
    state
        .queue
        .status(&id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("request {id} not found")))
}
