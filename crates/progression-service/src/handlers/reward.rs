//! 奖励扫描、预览与手动发放 API

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;
use validator::Validate;

use crate::dto::{ApiResponse, ManualGrantRequest, OrgQuery, PreviewRewardRequest};
use crate::error::ProgressionError;
use crate::models::UserReward;
use crate::service::{ManualGrantResult, RewardPreview};
use crate::state::AppState;

/// 显式奖励扫描，返回本次新发放的奖励
///
/// POST /api/users/{user_id}/rewards/sweep
pub async fn sweep_rewards(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<OrgQuery>,
) -> Result<Json<ApiResponse<Vec<UserReward>>>, ProgressionError> {
    req.validate()?;

    let granted = state.engine.sweep_rewards(&user_id, &req.org_id).await?;
    info!(user_id = %user_id, granted = granted.len(), "显式奖励扫描完成");
    Ok(Json(ApiResponse::success(granted)))
}

/// 预览条件树
///
/// POST /api/rewards/preview
pub async fn preview_reward(
    State(state): State<AppState>,
    Json(req): Json<PreviewRewardRequest>,
) -> Result<Json<ApiResponse<RewardPreview>>, ProgressionError> {
    req.validate()?;

    let preview = state
        .engine
        .preview_reward(
            &req.org_id,
            &req.unlock_condition,
            req.journey_id.as_deref(),
            req.user_id.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::success(preview)))
}

/// 手动发放奖励
///
/// POST /api/users/{user_id}/rewards/{reward_id}/grant
pub async fn grant_reward(
    State(state): State<AppState>,
    Path((user_id, reward_id)): Path<(String, String)>,
    Json(req): Json<ManualGrantRequest>,
) -> Result<Json<ApiResponse<ManualGrantResult>>, ProgressionError> {
    req.validate()?;

    let result = state
        .engine
        .grant_reward(&user_id, &req.org_id, &reward_id)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
