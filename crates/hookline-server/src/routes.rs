//! Route handlers. Run endpoints are long-polling: they return once the
//! stage has paused at its gate (or ended), while progress streams on
//! `/api/events` in the meantime.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hookline_engine::{RunEvent, StageOverride};
use hookline_types::{
    ArtifactId, Branch, BranchId, BranchSettings, GateState, HooklineError, Stage, StageArtifact,
    StagePayload, UnitKey, UnitPath,
};

use crate::{ApiResult, AppState};

fn parse_stage(raw: &str) -> Result<Stage, HooklineError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| HooklineError::Other(format!("unknown stage '{raw}'")))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub label: String,
    #[serde(default)]
    pub settings: Option<BranchSettings>,
}

pub async fn list_branches(State(state): State<AppState>) -> ApiResult<Json<Vec<Branch>>> {
    Ok(Json(state.coordinator.branches().list().await?))
}

pub async fn create_branch(
    State(state): State<AppState>,
    Json(body): Json<CreateBranchRequest>,
) -> ApiResult<(StatusCode, Json<Branch>)> {
    let branch = state
        .coordinator
        .create_branch(body.label, body.settings.unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

pub async fn get_branch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Branch>> {
    Ok(Json(state.coordinator.branches().load(BranchId(id)).await?))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.coordinator.delete_branch(BranchId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn branch_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunEvent>> {
    Ok(Json(state.coordinator.state_sync(BranchId(id)).await?))
}

#[derive(Debug, Serialize)]
pub struct SwitchResponse {
    pub branch: Branch,
    pub state: RunEvent,
}

pub async fn switch_branch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SwitchResponse>> {
    let (branch, sync) = state.coordinator.switch_branch(BranchId(id)).await?;
    Ok(Json(SwitchResponse {
        branch,
        state: sync,
    }))
}

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

pub async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<GateState>> {
    Ok(Json(state.coordinator.start_run(BranchId(id)).await?))
}

/// Optional per-segment adjustments carried with a gate continue. An agent
/// swap is a library-level concern; over HTTP the override is replacement
/// instructions for the next stage.
#[derive(Debug, Default, Deserialize)]
pub struct ContinueRequest {
    #[serde(default)]
    pub instructions: Option<String>,
}

pub async fn continue_gate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ContinueRequest>>,
) -> ApiResult<Json<GateState>> {
    let overrides = StageOverride {
        instructions: body.and_then(|Json(b)| b.instructions),
        agent: None,
    };
    Ok(Json(
        state
            .coordinator
            .continue_gate_with(BranchId(id), overrides)
            .await?,
    ))
}

pub async fn abort(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.coordinator.abort(BranchId(id)).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct RerunRequest {
    pub stage: Stage,
    pub path: UnitPath,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RerunResponse {
    pub completed: Vec<ArtifactId>,
    pub failed: Vec<(ArtifactId, String)>,
    pub cost_usd: f64,
}

pub async fn rerun_unit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RerunRequest>,
) -> ApiResult<Json<RerunResponse>> {
    let overrides = StageOverride {
        instructions: body.instructions,
        agent: None,
    };
    let report = state
        .coordinator
        .rerun_unit_with(BranchId(id), ArtifactId::new(body.stage, body.path), overrides)
        .await?;
    Ok(Json(RerunResponse {
        completed: report.completed,
        failed: report.failed,
        cost_usd: report.cost_usd,
    }))
}

// ---------------------------------------------------------------------------
// Human inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub unit: UnitKey,
    pub arm: u8,
    pub hook: u8,
    #[serde(default)]
    pub rationale: Option<String>,
}

pub async fn record_selection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SelectionRequest>,
) -> ApiResult<Json<ArtifactId>> {
    let selection = state
        .coordinator
        .record_selection(BranchId(id), body.unit, body.arm, body.hook, body.rationale)
        .await?;
    Ok(Json(selection))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub stage: Stage,
    pub path: UnitPath,
    pub payload: StagePayload,
}

pub async fn edit_artifact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<EditRequest>,
) -> ApiResult<Json<Vec<ArtifactId>>> {
    let invalidated = state
        .coordinator
        .edit_artifact(
            BranchId(id),
            ArtifactId::new(body.stage, body.path),
            body.payload,
        )
        .await?;
    Ok(Json(invalidated))
}

pub async fn put_foundation(
    State(state): State<AppState>,
    Json(payload): Json<StagePayload>,
) -> ApiResult<StatusCode> {
    state.coordinator.edit_foundation(payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Artifact reads
// ---------------------------------------------------------------------------

pub async fn list_artifacts(
    State(state): State<AppState>,
    Path((id, stage)): Path<(Uuid, String)>,
) -> ApiResult<Json<Vec<StageArtifact>>> {
    let stage = parse_stage(&stage)?;
    Ok(Json(
        state
            .coordinator
            .store()
            .list_stage_artifacts(BranchId(id), stage)
            .await?,
    ))
}
