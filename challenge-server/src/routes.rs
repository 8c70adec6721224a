use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use challenge_core::manager::{
    ChallengeCreated, ChallengeDetail, ChallengeRequest, ChallengeSummary, NewChallenge,
    RequesterChallengeCreated, SubmissionItem, SyncResult,
};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const SERVICE_NAME: &str = "challenge-hub";

/// Token from an `Authorization: Bearer <token>` header, if well formed and non-empty.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn is_moderator(state: &AppState, headers: &HeaderMap) -> bool {
    match (&state.moderator_api_key, bearer_token(headers)) {
        (Some(expected), Some(provided)) => provided == expected,
        _ => false,
    }
}

fn require_moderator(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    if state.moderator_api_key.is_none() {
        return Err(ApiError::unauthorized("moderator access is not configured"));
    }
    match bearer_token(headers) {
        None => Err(ApiError::unauthorized(
            "missing Authorization header. Expected: Bearer <token>",
        )),
        Some(_) if is_moderator(state, headers) => Ok(()),
        Some(_) => Err(ApiError::unauthorized("invalid moderator token")),
    }
}

fn require_requester(headers: &HeaderMap) -> ApiResult<&str> {
    bearer_token(headers).ok_or_else(|| {
        ApiError::unauthorized("missing requester token. Expected: Bearer <github token>")
    })
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
}

fn parse_pull_number(raw: &str) -> ApiResult<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ApiError::bad_request("pull number must be a positive integer"))
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": challenge_core::service_version(),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"success": true, "status": "ok"}))
}

async fn create_challenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ChallengeCreated>> {
    require_moderator(&state, &headers)?;
    let request: NewChallenge = parse_body(&body)?;
    let created = state.manager.create_challenge(&request).await?;
    info!("Moderator created challenge {}", created.challenge_id);
    Ok(Json(created))
}

async fn create_challenge_for_requester(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<RequesterChallengeCreated>> {
    let token = require_requester(&headers)?;
    let request: ChallengeRequest = parse_body(&body)?;
    let created = state
        .manager
        .create_challenge_for_requester(&request, token)
        .await?;
    info!(
        "Requester {} created challenge {}",
        created.requester, created.challenge.challenge_id
    );
    Ok(Json(created))
}

async fn list_challenges(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ChallengeSummary>>> {
    Ok(Json(state.manager.list_challenges().await?))
}

async fn get_challenge(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
) -> ApiResult<Json<ChallengeDetail>> {
    Ok(Json(state.manager.get_challenge_detail(&challenge_id).await?))
}

async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
) -> ApiResult<Json<Vec<SubmissionItem>>> {
    Ok(Json(state.manager.list_submissions(&challenge_id).await?))
}

async fn sync_challenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(challenge_id): Path<String>,
) -> ApiResult<Json<SyncResult>> {
    require_moderator(&state, &headers)?;
    Ok(Json(state.manager.sync_challenge(&challenge_id).await?))
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub ok: bool,
    pub processed: bool,
    pub merged: bool,
}

/// Moderators may evaluate any pull request; a requester only one they
/// authored or whose head repository they own.
async fn evaluate_pull(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((challenge_id, pull)): Path<(String, String)>,
) -> ApiResult<Json<EvaluateResponse>> {
    let pull_number = parse_pull_number(&pull)?;

    if !is_moderator(&state, &headers) {
        let token = require_requester(&headers)?;
        let allowed = state
            .manager
            .requester_can_operate_pull(&challenge_id, pull_number, token)
            .await?;
        if !allowed {
            warn!(
                "Requester may not evaluate PR #{} in {}",
                pull_number, challenge_id
            );
            return Err(ApiError::forbidden(
                "requester is neither the author nor the head repository owner",
            ));
        }
    }

    let org = state.manager.config().org.clone();
    let outcome = state
        .engine
        .evaluate_pull(&org, &challenge_id, pull_number)
        .await?;

    Ok(Json(EvaluateResponse {
        ok: true,
        processed: outcome.processed,
        merged: outcome.merged,
    }))
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/challenges", get(list_challenges).post(create_challenge))
        .route("/challenges/request", post(create_challenge_for_requester))
        .route("/challenges/:challenge_id", get(get_challenge))
        .route("/challenges/:challenge_id/submissions", get(list_submissions))
        .route("/challenges/:challenge_id/sync", post(sync_challenge))
        .route(
            "/challenges/:challenge_id/pulls/:pull/evaluate",
            post(evaluate_pull),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Bearer   ")), None);
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_parse_pull_number() {
        assert_eq!(parse_pull_number("12").unwrap(), 12);
        assert!(parse_pull_number("0").is_err());
        assert!(parse_pull_number("-1").is_err());
        assert!(parse_pull_number("abc").is_err());
    }
}
