//! 用户进度实体
//!
//! 报名、步骤完成记录和已获得奖励只由引擎的完成入口写入

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{EnrollmentStatus, GrantSource, StepStatus};

/// 报名记录
///
/// 每个（用户, 旅程）最多一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub journey_id: String,
    pub org_id: String,
    pub status: EnrollmentStatus,
    pub started_at: DateTime<Utc>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn start(
        user_id: impl Into<String>,
        journey_id: impl Into<String>,
        org_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            journey_id: journey_id.into(),
            org_id: org_id.into(),
            status: EnrollmentStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.status == EnrollmentStatus::Dropped
    }
}

/// 步骤完成记录
///
/// 只为已完成的步骤持久化，locked/available 由顺序推导
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub enrollment_id: String,
    pub step_id: String,
    pub status: StepStatus,
    pub points_earned: i64,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// 外部系统引用，用于审计
    #[sqlx(default)]
    pub external_reference: Option<String>,
    #[sqlx(default)]
    pub metadata: Option<Value>,
}

impl StepProgress {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// 用户已获得的奖励
///
/// 发放后不可变，`acknowledged_at` 只标记是否已向用户展示过
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserReward {
    pub user_id: String,
    pub reward_id: String,
    pub org_id: String,
    pub source: GrantSource,
    pub granted_at: DateTime<Utc>,
    #[sqlx(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl UserReward {
    pub fn grant(
        user_id: impl Into<String>,
        reward_id: impl Into<String>,
        org_id: impl Into<String>,
        source: GrantSource,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            reward_id: reward_id.into(),
            org_id: org_id.into(),
            source,
            granted_at: Utc::now(),
            acknowledged_at: None,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}
