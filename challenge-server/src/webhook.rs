use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use challenge_core::automerge::WebhookPayload;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Identifier attached to one webhook delivery for log correlation.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    pub action: String,
    pub processed: bool,
    pub merged: bool,
}

/// Reject deliveries whose signature does not match before any handler runs.
async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::bad_request("unreadable request body").into_response(),
    };

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if !state.engine.verify_signature(&bytes, signature) {
        error!(
            correlation_id = %correlation_id.0,
            "Invalid webhook signature"
        );
        return ApiError::unauthorized("invalid webhook signature").into_response();
    }

    let mut request = Request::from_parts(parts, axum::body::Body::from(bytes));
    request.extensions_mut().insert(correlation_id);

    next.run(request).await
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> ApiResult<Json<WebhookResponse>> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let event = request
        .headers()
        .get(EVENT_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("missing x-github-event"))?;

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| ApiError::bad_request("unreadable request body"))?;

    let payload: WebhookPayload = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::bad_request(format!("malformed webhook payload: {}", e)))?;

    let span = info_span!("webhook", correlation_id = %correlation_id, event = %event);
    let outcome = async {
        info!("Received webhook delivery");
        state.engine.process(&event, &payload).await
    }
    .instrument(span)
    .await?;

    Ok(Json(WebhookResponse {
        ok: true,
        action: outcome.action,
        processed: outcome.processed,
        merged: outcome.merged,
    }))
}

pub fn webhook_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route(
        "/webhooks/github",
        post(github_webhook_handler)
            .route_layer(middleware::from_fn_with_state(state, verify_webhook_signature)),
    )
}
