use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::ops::{EvidenceInput, MatchEngine, NewMatch, ResultSubmission};
use crate::error::EngineError;
use crate::models::{Agent, Dispute, Match, Ruleset};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchEngine>,
}

/// Create the API router
pub fn create_router(engine: Arc<MatchEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/matches", post(create_match))
        .route("/api/matches/:id", get(get_match))
        .route("/api/matches/:id/checkin", post(check_in))
        .route("/api/matches/:id/draft", post(draft_action))
        .route("/api/matches/:id/evidence/precheck", post(record_precheck))
        .route("/api/matches/:id/evidence/inrun", post(record_inrun))
        .route("/api/matches/:id/result", post(record_result))
        .route("/api/matches/:id/confirm", post(confirm))
        .route(
            "/api/matches/:id/disputes",
            post(open_dispute).get(list_disputes),
        )
        .route(
            "/api/matches/:id/disputes/:dispute_id/resolve",
            post(resolve_dispute),
        )
        .route("/api/matches/:id/resolve", post(force_resolve))
        .route("/api/matches/:id/cancel", post(cancel_match))
        .route("/api/rulesets", post(upsert_ruleset))
        .route("/api/agents", post(upsert_agent).get(list_agents))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn create_match(
    State(state): State<AppState>,
    Json(req): Json<NewMatch>,
) -> Result<(StatusCode, Json<Match>), ApiError> {
    let m = state.engine.create_match(req).await?;
    Ok((StatusCode::CREATED, Json(m)))
}

async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.get_match(id).await?))
}

async fn check_in(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.check_in(id, req.user_id).await?))
}

async fn draft_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DraftRequest>,
) -> Result<Json<Match>, ApiError> {
    let m = state
        .engine
        .apply_draft_action(id, req.user_id, &req.agent_id)
        .await?;
    Ok(Json(m))
}

async fn record_precheck(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<EvidenceInput>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.record_precheck(id, input).await?))
}

async fn record_inrun(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<EvidenceInput>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.record_inrun(id, input).await?))
}

async fn record_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(submission): Json<ResultSubmission>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.record_result(id, submission).await?))
}

async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.confirm(id, req.user_id).await?))
}

async fn open_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OpenDisputeRequest>,
) -> Result<(StatusCode, Json<DisputeResponse>), ApiError> {
    let (m, dispute) = state
        .engine
        .open_dispute(id, req.opened_by, &req.reason, req.evidence_urls)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DisputeResponse {
            match_state: m,
            dispute,
        }),
    ))
}

async fn list_disputes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Dispute>>, ApiError> {
    // 404 for unknown matches rather than an empty list.
    state.engine.get_match(id).await?;
    Ok(Json(state.engine.repo().list_disputes_by_match(id).await?))
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Path((id, dispute_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ResolveDisputeRequest>,
) -> Result<Json<Match>, ApiError> {
    let m = state
        .engine
        .resolve_dispute(id, dispute_id, req.resolved_by, &req.decision, req.winner_user_id)
        .await?;
    Ok(Json(m))
}

async fn force_resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ForceResolveRequest>,
) -> Result<Json<Match>, ApiError> {
    let m = state
        .engine
        .force_resolve(id, req.winner_user_id, req.overrides.unwrap_or_default())
        .await?;
    Ok(Json(m))
}

async fn cancel_match(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.engine.cancel(id).await?))
}

async fn upsert_ruleset(
    State(state): State<AppState>,
    Json(ruleset): Json<Ruleset>,
) -> Result<(StatusCode, Json<Ruleset>), ApiError> {
    state.engine.repo().save_ruleset(&ruleset).await?;
    Ok((StatusCode::CREATED, Json(ruleset)))
}

async fn upsert_agent(
    State(state): State<AppState>,
    Json(agent): Json<Agent>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    state.engine.repo().save_agent(&agent).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.engine.repo().list_agents().await?))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct CheckInRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct DraftRequest {
    user_id: Uuid,
    agent_id: String,
}

#[derive(Deserialize)]
struct OpenDisputeRequest {
    opened_by: Option<Uuid>,
    reason: String,
    #[serde(default)]
    evidence_urls: Vec<String>,
}

#[derive(Deserialize)]
struct ResolveDisputeRequest {
    resolved_by: Uuid,
    decision: String,
    winner_user_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct ForceResolveRequest {
    winner_user_id: Option<Uuid>,
    overrides: Option<std::collections::HashMap<Uuid, crate::models::SettlementOverride>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct DisputeResponse {
    match_state: Match,
    dispute: Dispute,
}

// ===== Error Handling =====

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.0.to_string()),
            EngineError::NotParticipant(_) | EngineError::Forbidden(_) => {
                (StatusCode::FORBIDDEN, self.0.to_string())
            }
            EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            EngineError::Storage(err) => {
                tracing::error!("Storage error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
