//! 积分账本
//!
//! 仅追加写入；唯一例外是管理端触发的积分重算会改写步骤完成条目的积分字段。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::LedgerSourceType;

/// 账本条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub org_id: String,
    pub source_type: LedgerSourceType,
    /// 来源对象 ID（步骤、奖励、资料字段或里程碑 key）
    pub source_ref: String,
    #[sqlx(default)]
    pub enrollment_id: Option<String>,
    pub base_points: i64,
    pub multiplier: f64,
    pub points: i64,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待写入的账本条目
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub user_id: String,
    pub org_id: String,
    pub source_type: LedgerSourceType,
    pub source_ref: String,
    pub enrollment_id: Option<String>,
    pub base_points: i64,
    pub multiplier: f64,
    pub points: i64,
    pub idempotency_key: String,
}

impl NewLedgerEntry {
    pub fn into_entry(self, id: i64, now: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            user_id: self.user_id,
            org_id: self.org_id,
            source_type: self.source_type,
            source_ref: self.source_ref,
            enrollment_id: self.enrollment_id,
            base_points: self.base_points,
            multiplier: self.multiplier,
            points: self.points,
            idempotency_key: self.idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 积分重算对单条目的改写
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub id: i64,
    pub base_points: i64,
    pub multiplier: f64,
    pub points: i64,
}

/// 幂等键
///
/// 同一来源只入账一次
pub mod idempotency {
    pub fn step(enrollment_id: &str, step_id: &str) -> String {
        format!("step:{}:{}", enrollment_id, step_id)
    }

    pub fn reward(user_id: &str, org_id: &str, reward_id: &str) -> String {
        format!("reward:{}:{}:{}", user_id, org_id, reward_id)
    }

    pub fn profile_field(user_id: &str, org_id: &str, field: &str) -> String {
        format!("profile:{}:{}:{}", user_id, org_id, field)
    }

    pub fn milestone(user_id: &str, org_id: &str, key: &str) -> String {
        format!("milestone:{}:{}:{}", user_id, org_id, key)
    }
}
