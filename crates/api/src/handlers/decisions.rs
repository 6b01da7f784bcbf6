use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use orchestrator_brain::DecisionType;
use serde::Deserialize;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct DecisionQuery {
    /// 为 true 时只返回待审核的决策
    #[serde(default)]
    pub pending: bool,
    pub decision_type: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_decisions(
    State(state): State<AppState>,
    Query(params): Query<DecisionQuery>,
) -> ApiResult<impl IntoResponse> {
    let brain = state.control_plane.brain();
    let decision_type = params
        .decision_type
        .as_deref()
        .map(str::parse::<DecisionType>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let decisions: Vec<_> = if params.pending {
        brain
            .pending_decisions()
            .await
            .into_iter()
            .filter(|d| decision_type.map_or(true, |t| d.decision_type == t))
            .collect()
    } else {
        brain
            .get_decision_history(params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT), decision_type)
            .await
    };
    Ok(success(decisions))
}

pub async fn approve_decision(
    State(state): State<AppState>,
    Path(decision_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let decision = state
        .control_plane
        .brain()
        .approve_decision(&decision_id)
        .await?;
    info!("决策 {} 已人工批准", decision_id);
    Ok(success(decision))
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

pub async fn reject_decision(
    State(state): State<AppState>,
    Path(decision_id): Path<String>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    // 请求体可省略
    let reason = body.ok().and_then(|Json(b)| b.reason);
    let decision = state
        .control_plane
        .brain()
        .reject_decision(&decision_id, reason)
        .await?;
    info!("决策 {} 已人工驳回", decision_id);
    Ok(success(decision))
}
