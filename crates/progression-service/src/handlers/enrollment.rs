//! 报名与步骤完成 API

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;
use validator::Validate;

use crate::dto::{ApiResponse, CompleteStepRequest, EnrollRequest};
use crate::error::ProgressionError;
use crate::service::{CompleteStepCommand, EnrollmentView, StepCompletionResult};
use crate::state::AppState;

/// 报名旅程
///
/// POST /api/enrollments
pub async fn enroll(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<ApiResponse<EnrollmentView>>, ProgressionError> {
    req.validate()?;

    let view = state.engine.enroll(&req.user_id, &req.journey_id).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// 完成步骤
///
/// POST /api/enrollments/{enrollment_id}/steps/{step_id}/complete
///
/// 重复调用返回相同的步骤进度，`alreadyCompleted` 为 true，不重复入账。
pub async fn complete_step(
    State(state): State<AppState>,
    Path((enrollment_id, step_id)): Path<(String, String)>,
    body: Option<Json<CompleteStepRequest>>,
) -> Result<Json<ApiResponse<StepCompletionResult>>, ProgressionError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;

    let cmd = CompleteStepCommand {
        enrollment_id,
        step_id,
        external_reference: req.external_reference,
        metadata: req.metadata,
    };
    let result = state.engine.complete_step(cmd).await?;

    info!(
        step_id = %result.progress.step_id,
        already_completed = result.already_completed,
        granted = result.granted_rewards.len(),
        "完成步骤请求处理完毕"
    );
    Ok(Json(ApiResponse::success(result)))
}
