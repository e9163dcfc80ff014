use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::aggregate::TrendRun;
use crate::dispatch::Completion;
use crate::error::{AssignError, MissionError};
use crate::history::RunRecord;
use crate::metrics::Metrics;
use crate::missions::{Mission, MissionId};
use crate::pipeline::Pipeline;
use crate::registry::{AgentProfile, DocumentRef, HallOfFame, MissionResult};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn router(pipeline: Arc<Pipeline>, metrics: &Metrics) -> Router {
    let state = AppState { pipeline };
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/trends", get(trends))
        .route("/missions", get(missions))
        .route("/missions/{id}", get(mission))
        .route("/missions/{id}/complete", post(complete_mission))
        .route("/agents", get(agents).post(register_agent))
        .route("/agents/{name}", get(agent))
        .route("/hall-of-fame", get(hall_of_fame))
        .route("/runs", get(runs))
        .merge(metrics.router())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// JSON error body `{ "error": "..." }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<AssignError> for ApiError {
    fn from(e: AssignError) -> Self {
        let status = match &e {
            AssignError::UnknownMission(_) | AssignError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            AssignError::DuplicateAgent(_)
            | AssignError::Conflict { .. }
            | AssignError::Mission(MissionError::InvalidTransition { .. })
            | AssignError::Mission(MissionError::WrongAssignee { .. }) => StatusCode::CONFLICT,
            AssignError::Mission(MissionError::QualityOutOfRange(_)) => StatusCode::BAD_REQUEST,
            AssignError::NoEligibleAgent(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TrendsQuery {
    limit: Option<usize>,
    category: Option<String>,
}

async fn trends(
    State(state): State<AppState>,
    Query(q): Query<TrendsQuery>,
) -> Result<Json<TrendRun>, ApiError> {
    let mut run = state
        .pipeline
        .latest_trends()
        .ok_or_else(|| ApiError::not_found("no aggregation run yet"))?;
    if let Some(cat) = q.category.as_deref() {
        run.trends.retain(|t| t.categories.contains(cat));
    }
    if let Some(n) = q.limit {
        run.trends.truncate(n);
    }
    Ok(Json(run))
}

async fn missions(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<Mission>> {
    let mut out = state.pipeline.board().list();
    if let Some(status) = q.get("status") {
        out.retain(|m| m.status.name() == status.as_str());
    }
    if let Some(agent) = q.get("agent") {
        out.retain(|m| m.assignee() == Some(agent.as_str()));
    }
    Json(out)
}

fn parse_mission_id(raw: &str) -> Result<MissionId, ApiError> {
    raw.parse::<MissionId>()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))
}

async fn mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Mission>, ApiError> {
    let id = parse_mission_id(&id)?;
    state
        .pipeline
        .board()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown mission {id}")))
}

#[derive(Debug, Deserialize)]
struct CompleteReq {
    agent: String,
    quality_score: f64,
    success: bool,
    #[serde(default)]
    artifacts: Vec<DocumentRef>,
}

async fn complete_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteReq>,
) -> Result<Json<AgentView>, ApiError> {
    let id = parse_mission_id(&id)?;
    let name = body.agent.trim().to_string();
    let done = Completion {
        agent: name.clone(),
        artifacts: body.artifacts,
        quality_score: body.quality_score,
        success: body.success,
    };
    state
        .pipeline
        .complete_mission(id, done, Utc::now())
        .await?;
    agent_view(&state, &name).map(Json)
}

/// Registry entry as served over HTTP.
#[derive(Debug, Serialize)]
struct AgentView {
    name: String,
    specialization: String,
    performance_score: f64,
    completed: usize,
    successes: usize,
    active: Vec<MissionId>,
    eliminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_completed_at: Option<DateTime<Utc>>,
}

fn agent_view(state: &AppState, name: &str) -> Result<AgentView, ApiError> {
    let v = state
        .pipeline
        .registry()
        .get(name)
        .ok_or_else(|| ApiError::not_found(format!("unknown agent {name}")))?;
    Ok(AgentView {
        completed: v.profile.history.len(),
        successes: v.profile.successes(),
        last_completed_at: v.profile.history.last().map(|r| r.completed_at),
        name: v.profile.name,
        specialization: v.profile.specialization,
        performance_score: v.profile.performance_score,
        active: v.active.into_iter().collect(),
        eliminated: v.eliminated,
    })
}

async fn agents(State(state): State<AppState>) -> Result<Json<Vec<AgentView>>, ApiError> {
    let names: Vec<String> = state
        .pipeline
        .registry()
        .list()
        .into_iter()
        .map(|v| v.profile.name)
        .collect();
    names
        .iter()
        .map(|n| agent_view(&state, n))
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

#[derive(Debug, Serialize)]
struct AgentDetail {
    #[serde(flatten)]
    view: AgentView,
    history: Vec<MissionResult>,
}

async fn agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AgentDetail>, ApiError> {
    let view = agent_view(&state, &name)?;
    let history = state.pipeline.registry().history(&name).unwrap_or_default();
    Ok(Json(AgentDetail { view, history }))
}

#[derive(Debug, Deserialize)]
struct RegisterReq {
    name: String,
    #[serde(default)]
    specialization: String,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<RegisterReq>,
) -> Result<(StatusCode, Json<AgentProfile>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "agent name must not be empty"));
    }
    let profile = state
        .pipeline
        .register_agent(&body.name, &body.specialization)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn hall_of_fame(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let hof: HallOfFame = state.pipeline.hall_of_fame();
    match q.get("format").map(String::as_str) {
        Some("md") | Some("markdown") => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            hof.to_markdown(),
        )
            .into_response(),
        _ => Json(hof).into_response(),
    }
}

async fn runs(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<RunRecord>> {
    let n = q
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);
    Json(state.pipeline.history().last_n(n))
}
