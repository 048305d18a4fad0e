//! 资料字段与里程碑 API

use axum::{
    Json,
    extract::{Path, State},
};
use validator::Validate;

use crate::dto::{ApiResponse, CompleteMilestoneRequest, CompleteProfileFieldsRequest};
use crate::error::ProgressionError;
use crate::service::{MilestoneResult, ProfileFieldResult};
use crate::state::AppState;

/// POST /api/users/{user_id}/profile-fields/complete
pub async fn complete_profile_fields(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<CompleteProfileFieldsRequest>,
) -> Result<Json<ApiResponse<ProfileFieldResult>>, ProgressionError> {
    req.validate()?;

    let result = state
        .engine
        .complete_profile_fields(&user_id, &req.org_id, &req.fields)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// POST /api/users/{user_id}/milestones/complete
pub async fn complete_milestone(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<CompleteMilestoneRequest>,
) -> Result<Json<ApiResponse<MilestoneResult>>, ProgressionError> {
    req.validate()?;

    let result = state
        .engine
        .complete_milestone(&user_id, &req.org_id, &req.milestone_key, req.points)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
