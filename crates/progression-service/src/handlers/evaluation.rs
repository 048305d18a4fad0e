//! 进度评估 API

use axum::{
    Json,
    extract::{Path, Query, State},
};
use validator::Validate;

use crate::dto::{ApiResponse, OrgQuery};
use crate::error::ProgressionError;
use crate::service::EvaluationResult;
use crate::state::AppState;

/// 评估用户进度
///
/// GET /api/users/{user_id}/evaluation?orgId=
pub async fn evaluate(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<OrgQuery>,
) -> Result<Json<ApiResponse<EvaluationResult>>, ProgressionError> {
    query.validate()?;

    let result = state.engine.evaluate(&user_id, &query.org_id).await?;
    Ok(Json(ApiResponse::success(result)))
}
