pub mod config;
pub mod error;
pub mod routes;
pub mod webhook;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use challenge_core::{AutoMergeEngine, ChallengeManager};

pub use config::Config;
pub use error::{ApiError, ApiResult};

pub struct AppState {
    pub engine: Arc<AutoMergeEngine>,
    pub manager: Arc<ChallengeManager>,
    /// `None` disables moderator routes.
    pub moderator_api_key: Option<String>,
}

/// Full HTTP surface, mounted under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    let api = routes::api_router().merge(webhook::webhook_router(state.clone()));

    Router::new()
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
