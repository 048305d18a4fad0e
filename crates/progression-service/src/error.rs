//! 进度服务错误类型
//!
//! 定义服务层的业务错误和系统错误，以及到 HTTP 响应的映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use unlock_rules::RuleError;

/// 进度服务错误类型
#[derive(Debug, Error)]
pub enum ProgressionError {
    // === 资源不存在 ===
    #[error("报名记录不存在: {0}")]
    EnrollmentNotFound(String),

    #[error("步骤不存在: {step_id} (journey_id={journey_id})")]
    StepNotFound { journey_id: String, step_id: String },

    #[error("旅程不存在: {0}")]
    JourneyNotFound(String),

    #[error("奖励不存在: {0}")]
    RewardNotFound(String),

    // === 业务错误 ===
    #[error("步骤尚未解锁: step_id={step_id}, 当前状态={status}")]
    StepLocked { step_id: String, status: String },

    #[error("报名已失效: enrollment_id={enrollment_id}, status={status}")]
    EnrollmentInactive {
        enrollment_id: String,
        status: String,
    },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("条件规则无效: {0}")]
    Rule(#[from] RuleError),

    #[error("资源正被其他请求处理: {resource}")]
    LockConflict { resource: String },

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 进度服务 Result 类型别名
pub type Result<T> = std::result::Result<T, ProgressionError>;

impl ProgressionError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::ConcurrencyConflict | Self::LockConflict { .. }
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Redis(_)
                | Self::Internal(_)
                | Self::ConcurrencyConflict
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EnrollmentNotFound(_) => "ENROLLMENT_NOT_FOUND",
            Self::StepNotFound { .. } => "STEP_NOT_FOUND",
            Self::JourneyNotFound(_) => "JOURNEY_NOT_FOUND",
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::StepLocked { .. } => "STEP_LOCKED",
            Self::EnrollmentInactive { .. } => "ENROLLMENT_INACTIVE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Rule(_) => "INVALID_CONDITION",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EnrollmentNotFound(_)
            | Self::StepNotFound { .. }
            | Self::JourneyNotFound(_)
            | Self::RewardNotFound(_) => StatusCode::NOT_FOUND,

            Self::Validation(_) | Self::Rule(_) => StatusCode::BAD_REQUEST,

            Self::StepLocked { .. }
            | Self::EnrollmentInactive { .. }
            | Self::LockConflict { .. }
            | Self::ConcurrencyConflict => StatusCode::CONFLICT,

            Self::Database(_) | Self::Serialization(_) | Self::Redis(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// PostgreSQL 序列化失败或死锁视为并发冲突
    pub(crate) fn from_db(err: sqlx::Error) -> Self {
        let conflict = match &err {
            sqlx::Error::Database(db_err) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        };
        if conflict {
            Self::ConcurrencyConflict
        } else {
            Self::Database(err)
        }
    }
}

impl IntoResponse for ProgressionError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Serialization(e) => {
                tracing::error!(error = %e, "序列化失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Redis(e) => {
                tracing::error!(error = %e, "Redis 操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ProgressionError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<redis::RedisError> for ProgressionError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(ProgressionError::ConcurrencyConflict.is_retryable());
        assert!(
            ProgressionError::LockConflict {
                resource: "enrollment:e1".to_string()
            }
            .is_retryable()
        );
        assert!(!ProgressionError::EnrollmentNotFound("e1".to_string()).is_retryable());
        assert!(
            !ProgressionError::StepLocked {
                step_id: "s2".to_string(),
                status: "locked".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(ProgressionError::RewardNotFound("r1".to_string()).is_business_error());
        assert!(ProgressionError::Validation("bad".to_string()).is_business_error());
        assert!(!ProgressionError::Internal("boom".to_string()).is_business_error());
        assert!(!ProgressionError::ConcurrencyConflict.is_business_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProgressionError::EnrollmentNotFound("e1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProgressionError::Rule(RuleError::UnknownConditionType("x".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProgressionError::EnrollmentInactive {
                enrollment_id: "e1".to_string(),
                status: "dropped".to_string()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ProgressionError::Internal("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            ProgressionError::StepLocked {
                step_id: "s2".to_string(),
                status: "locked".to_string()
            }
            .error_code(),
            "STEP_LOCKED"
        );
        assert_eq!(
            ProgressionError::ConcurrencyConflict.error_code(),
            "CONCURRENCY_CONFLICT"
        );
    }

    #[test]
    fn test_from_db_keeps_plain_errors() {
        let err = ProgressionError::from_db(sqlx::Error::RowNotFound);
        assert!(matches!(err, ProgressionError::Database(_)));
    }

    #[tokio::test]
    async fn test_system_error_response_hides_detail() {
        let response = ProgressionError::Internal("secret detail".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }
}
