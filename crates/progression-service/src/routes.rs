//! 路由配置
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState};

/// 用户进度路由
fn progression_routes() -> Router<AppState> {
    Router::new()
        .route("/enrollments", post(handlers::enrollment::enroll))
        .route(
            "/enrollments/{enrollment_id}/steps/{step_id}/complete",
            post(handlers::enrollment::complete_step),
        )
        .route(
            "/users/{user_id}/profile-fields/complete",
            post(handlers::progress::complete_profile_fields),
        )
        .route(
            "/users/{user_id}/milestones/complete",
            post(handlers::progress::complete_milestone),
        )
        .route(
            "/users/{user_id}/evaluation",
            get(handlers::evaluation::evaluate),
        )
}

/// 奖励与积分管理路由
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/{user_id}/rewards/sweep",
            post(handlers::reward::sweep_rewards),
        )
        .route(
            "/users/{user_id}/rewards/{reward_id}/grant",
            post(handlers::reward::grant_reward),
        )
        .route("/rewards/preview", post(handlers::reward::preview_reward))
        .route(
            "/orgs/{org_id}/points/recalculate",
            post(handlers::points::recalculate_points),
        )
}

/// 全部 API 路由，挂载在 `/api` 下
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(progression_routes())
        .merge(admin_routes())
}

/// 完整应用路由（不含中间件）
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health_check))
        .with_state(state)
}
