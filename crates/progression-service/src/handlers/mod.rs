//! HTTP 请求处理器

pub mod enrollment;
pub mod evaluation;
pub mod points;
pub mod progress;
pub mod reward;

use axum::Json;

use crate::dto::HealthResponse;

/// 存活探针
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "progression-service",
    })
}
