//! 积分重算 API

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::dto::{ApiResponse, RecalculationResponse};
use crate::error::ProgressionError;
use crate::state::AppState;

/// 重算组织内全部步骤积分
///
/// POST /api/orgs/{org_id}/points/recalculate
pub async fn recalculate_points(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Json<ApiResponse<RecalculationResponse>>, ProgressionError> {
    info!(org_id = %org_id, "开始积分重算");

    let report = state.recalculation.recalculate_points(&org_id).await?;
    Ok(Json(ApiResponse::success(report.into())))
}
