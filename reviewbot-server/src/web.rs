//! HTTP transport for the reviewer assignment engine.
//!
//! Routes, wire payloads, and the mapping from domain errors to status
//! codes all live here; the engine knows nothing about HTTP. User ids
//! travel as decimal strings on the wire and are parsed at this boundary.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use reviewbot_core::{
    EngineError, NewTeamMember, PrId, PrStatus, PullRequest, Team, TeamUpsert, UserId,
};

use crate::AppState;

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_review_prs))
        .route("/pullRequest/create", post(create_pr))
        .route("/pullRequest/merge", post(merge_pr))
        .route("/pullRequest/reassign", post(reassign_reviewer))
}

// =============================================================================
// Wire payloads
// =============================================================================

#[derive(Debug, Deserialize)]
struct AddTeamRequest {
    team_name: String,
    #[serde(default)]
    members: Vec<NewTeamMember>,
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    user_id: String,
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct CreatePrRequest {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
}

#[derive(Debug, Deserialize)]
struct MergePrRequest {
    pull_request_id: String,
}

#[derive(Debug, Deserialize)]
struct ReassignRequest {
    pull_request_id: String,
    old_user_id: String,
}

/// Pull request as presented to clients: user ids become decimal strings.
#[derive(Debug, Serialize)]
struct PrBody {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: PrStatus,
    assigned_reviewers: Vec<String>,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "mergedAt", skip_serializing_if = "Option::is_none")]
    merged_at: Option<DateTime<Utc>>,
}

impl From<PullRequest> for PrBody {
    fn from(pr: PullRequest) -> Self {
        Self {
            pull_request_id: pr.id.to_string(),
            pull_request_name: pr.name,
            author_id: pr.author_id.to_string(),
            status: pr.status,
            assigned_reviewers: pr
                .assigned_reviewers
                .iter()
                .map(UserId::to_string)
                .collect(),
            created_at: pr.created_at,
            merged_at: pr.merged_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct MemberBody {
    user_id: String,
    username: String,
    is_active: bool,
}

#[derive(Debug, Serialize)]
struct TeamBody {
    team_name: String,
    members: Vec<MemberBody>,
}

impl From<Team> for TeamBody {
    fn from(team: Team) -> Self {
        Self {
            team_name: team.name,
            members: team
                .members
                .into_iter()
                .map(|m| MemberBody {
                    user_id: m.user_id.to_string(),
                    username: m.username,
                    is_active: m.is_active,
                })
                .collect(),
        }
    }
}

// =============================================================================
// Error mapping
// =============================================================================

/// Transport-level error carrying the status code and the wire error code.
/// Serializes as `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_REQUEST",
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: "internal error".to_string(),
        }
    }

    fn team_exists() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "TEAM_EXISTS",
            message: "team_name already exists".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::PrAlreadyExists(_) => (StatusCode::CONFLICT, "PR_EXISTS"),
            EngineError::AlreadyMerged(_) => (StatusCode::CONFLICT, "PR_MERGED"),
            EngineError::ReviewerNotAssigned { .. } => (StatusCode::CONFLICT, "NOT_ASSIGNED"),
            EngineError::NoCandidate { .. } => (StatusCode::CONFLICT, "NO_CANDIDATE"),
            EngineError::InvalidUserId(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            EngineError::Internal(message) => {
                error!("Internal engine error: {}", message);
                return Self::internal();
            }
            EngineError::Storage(e) => {
                error!("Storage failure: {}", e);
                return Self::internal();
            }
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// Parse a request body, keeping the error envelope for malformed JSON.
fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::invalid("invalid JSON"))
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse::<UserId>()
        .map_err(|_| EngineError::InvalidUserId(raw.to_string()).into())
}

// =============================================================================
// Handlers
// =============================================================================

async fn add_team(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: AddTeamRequest = parse_json(&body)?;

    match state
        .team_engine
        .create_or_update(&req.team_name, &req.members)
        .await?
    {
        TeamUpsert::Created(team) => Ok((
            StatusCode::CREATED,
            Json(json!({ "team": TeamBody::from(team) })),
        )
            .into_response()),
        // Members were refreshed above; the signal still surfaces as an
        // error response so callers can tell this from a fresh create.
        TeamUpsert::Refreshed(_) => Err(ApiError::team_exists()),
    }
}

async fn get_team(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let name = params
        .get("team_name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::invalid("team_name query required"))?;

    let team = state.team_engine.get_team(name).await?;
    Ok(Json(TeamBody::from(team)).into_response())
}

async fn set_is_active(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: SetActiveRequest = parse_json(&body)?;
    let user_id = parse_user_id(&req.user_id)?;

    let user = state.user_engine.set_active(user_id, req.is_active).await?;
    Ok(Json(json!({ "user": user })).into_response())
}

async fn get_review_prs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let raw_id = params
        .get("user_id")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::invalid("user_id required"))?;
    let user_id = parse_user_id(raw_id)?;

    let prs = state.pr_engine.prs_for_reviewer(user_id).await?;
    let prs: Vec<PrBody> = prs.into_iter().map(PrBody::from).collect();
    Ok(Json(json!({ "user_id": raw_id, "pull_requests": prs })).into_response())
}

async fn create_pr(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: CreatePrRequest = parse_json(&body)?;
    let author_id = parse_user_id(&req.author_id)?;

    let pr = state
        .pr_engine
        .create_pr(
            PrId::from(req.pull_request_id),
            req.pull_request_name,
            author_id,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "pr": PrBody::from(pr) })),
    )
        .into_response())
}

async fn merge_pr(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: MergePrRequest = parse_json(&body)?;

    let pr = state
        .pr_engine
        .merge_pr(&PrId::from(req.pull_request_id))
        .await?;
    Ok(Json(json!({ "pr": PrBody::from(pr) })).into_response())
}

async fn reassign_reviewer(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: ReassignRequest = parse_json(&body)?;
    let old_user_id = parse_user_id(&req.old_user_id)?;

    let (pr, new_reviewer) = state
        .pr_engine
        .reassign_reviewer(&PrId::from(req.pull_request_id), old_user_id)
        .await?;
    Ok(Json(json!({
        "pr": PrBody::from(pr),
        "replaced_by": new_reviewer.to_string()
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewbot_core::StoreError;

    #[test]
    fn test_not_found_maps_to_404() {
        let api: ApiError = EngineError::user_not_found(UserId(7)).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert_eq!(api.code, "NOT_FOUND");
    }

    #[test]
    fn test_lifecycle_violations_map_to_409() {
        let api: ApiError = EngineError::PrAlreadyExists(PrId::from("pr-1")).into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, "PR_EXISTS");

        let api: ApiError = EngineError::AlreadyMerged(PrId::from("pr-1")).into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, "PR_MERGED");

        let api: ApiError = EngineError::ReviewerNotAssigned {
            pr: PrId::from("pr-1"),
            reviewer: UserId(2),
        }
        .into();
        assert_eq!(api.code, "NOT_ASSIGNED");

        let api: ApiError = EngineError::NoCandidate {
            team: "infra".to_string(),
        }
        .into();
        assert_eq!(api.code, "NO_CANDIDATE");
    }

    #[test]
    fn test_storage_failures_are_opaque_internal_errors() {
        let api: ApiError = EngineError::Storage(StoreError::storage("get", "boom")).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code, "INTERNAL");
        assert_eq!(api.message, "internal error");
    }

    #[test]
    fn test_invalid_user_id_is_a_bad_request() {
        let api = parse_user_id("alice").unwrap_err();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "INVALID_REQUEST");

        assert!(parse_user_id("42").is_ok());
    }

    #[test]
    fn test_pr_body_stringifies_user_ids() {
        let pr = PullRequest {
            id: PrId::from("pr-1"),
            name: "fix".to_string(),
            author_id: UserId(1),
            status: PrStatus::Open,
            assigned_reviewers: vec![UserId(2), UserId(3)],
            created_at: Utc::now(),
            merged_at: None,
            version: 4,
        };
        let body = PrBody::from(pr);

        assert_eq!(body.author_id, "1");
        assert_eq!(body.assigned_reviewers, vec!["2", "3"]);

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"status\":\"OPEN\""));
        assert!(!json.contains("version"));
    }
}
