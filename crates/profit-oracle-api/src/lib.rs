//! HTTP ingress for consulting runs: requests are accepted immediately and
//! processed by a bounded worker pool.

pub mod config;
pub mod error;
pub mod queue;
pub mod routes;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use config::ApiConfig;
pub use error::AppError;
pub use queue::{
    AnalyzeRequest, QueueMetrics, RequestQueue, RequestState, RequestStatus, SubmitError,
};

#[derive(Clone)]
pub struct AppState {
    pub queue: RequestQueue,
}

impl AppState {
    pub fn new(queue: RequestQueue) -> Self {
        Self { queue }
    }
}

pub fn build_router(state: AppState) -> Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}
