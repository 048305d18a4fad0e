//! 存储 Trait 定义
//!
//! 引擎只依赖这些接口，内存实现和 PostgreSQL 实现都实现全部 trait

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Enrollment, Journey, LedgerEntry, LedgerUpdate, Level, NewLedgerEntry, OrgSettings, Resource,
    Reward, Step, StepProgress, UserReward,
};

/// 一次步骤完成需要原子写入的内容
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletionWrite {
    pub progress: StepProgress,
    pub ledger: NewLedgerEntry,
    /// 本次完成后旅程全部步骤完成
    pub completes_enrollment: bool,
    pub completed_at: DateTime<Utc>,
}

/// 步骤完成写入结果
#[derive(Debug, Clone, PartialEq)]
pub enum StepWriteOutcome {
    Recorded(StepProgress),
    /// 该步骤已有完成记录，返回已存在的记录
    AlreadyCompleted(StepProgress),
}

/// 账本追加结果
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended(LedgerEntry),
    /// 幂等键已存在
    Duplicate,
}

/// 奖励发放写入结果
#[derive(Debug, Clone, PartialEq)]
pub enum GrantWrite {
    Inserted(UserReward),
    AlreadyOwned,
}

/// 目录存储（管理端维护，只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_levels(&self, org_id: &str) -> Result<Vec<Level>>;

    async fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>>;
    async fn list_rewards(&self, org_id: &str) -> Result<Vec<Reward>>;

    async fn list_resources(&self, org_id: &str) -> Result<Vec<Resource>>;

    async fn get_journey(&self, journey_id: &str) -> Result<Option<Journey>>;
    async fn list_journeys(&self, org_id: &str) -> Result<Vec<Journey>>;

    async fn list_steps(&self, journey_id: &str) -> Result<Vec<Step>>;
    async fn list_org_steps(&self, org_id: &str) -> Result<Vec<Step>>;
}

/// 报名与步骤进度存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_enrollment(&self, enrollment_id: &str) -> Result<Option<Enrollment>>;

    /// 插入报名记录；（用户, 旅程）已存在时返回已有记录
    async fn create_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment>;

    async fn list_enrollments(&self, user_id: &str, org_id: &str) -> Result<Vec<Enrollment>>;

    async fn list_step_progress(&self, enrollment_id: &str) -> Result<Vec<StepProgress>>;

    /// 用户在组织内全部报名下的步骤进度
    async fn list_user_step_progress(&self, user_id: &str, org_id: &str)
    -> Result<Vec<StepProgress>>;

    /// 原子写入步骤完成记录和账本条目，必要时将报名标记为完成
    async fn record_step_completion(&self, write: &StepCompletionWrite)
    -> Result<StepWriteOutcome>;
}

/// 积分账本存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome>;

    async fn total_points(&self, user_id: &str, org_id: &str) -> Result<i64>;

    /// 按 id 游标分页读取组织内的步骤完成条目
    async fn list_step_entries_after(
        &self,
        org_id: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>>;

    /// 在一个事务内应用一批重算结果，返回更新行数
    async fn apply_recalculation(&self, updates: &[LedgerUpdate]) -> Result<u64>;
}

/// 用户奖励存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRewardStore: Send + Sync {
    async fn list_user_rewards(&self, user_id: &str, org_id: &str) -> Result<Vec<UserReward>>;

    /// 原子写入奖励和附带积分；已持有时不写入
    async fn grant(&self, reward: &UserReward, ledger: Option<NewLedgerEntry>)
    -> Result<GrantWrite>;

    /// 标记奖励已展示，返回更新行数
    async fn acknowledge(
        &self,
        user_id: &str,
        reward_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64>;
}

/// 用户资料（外部系统维护，只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserProfileStore: Send + Sync {
    async fn is_profile_complete(&self, user_id: &str, org_id: &str) -> Result<bool>;

    /// 读取字段值，不存在的字段不出现在结果中
    async fn get_field_values(
        &self,
        user_id: &str,
        org_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, String>>;
}

/// 组织配置（只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrgConfigStore: Send + Sync {
    async fn get_settings(&self, org_id: &str) -> Result<Option<OrgSettings>>;
}
