//! 服务层数据传输对象
//!
//! 定义引擎对外返回的结果结构，与内部领域模型解耦

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unlock_rules::{LockReason, TreeEvaluation, TreeReferences, UserProgressionSnapshot, Violation};

use crate::models::{Enrollment, EnrollmentStatus, Reward, StepProgress, UserReward};
use crate::service::ledger::LevelProgress;
use crate::service::sequencer::StepState;

/// 报名结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    pub enrollment: Enrollment,
    pub steps: Vec<StepState>,
}

/// 完成步骤命令
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteStepCommand {
    pub enrollment_id: String,
    pub step_id: String,
    pub external_reference: Option<String>,
    pub metadata: Option<Value>,
}

impl CompleteStepCommand {
    pub fn new(enrollment_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            enrollment_id: enrollment_id.into(),
            step_id: step_id.into(),
            ..Default::default()
        }
    }
}

/// 完成步骤结果
///
/// 重复完成时 `already_completed` 为 true，返回与首次完成相同的进度记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompletionResult {
    pub progress: StepProgress,
    pub already_completed: bool,
    pub journey_completed: bool,
    pub points_awarded: i64,
    pub granted_rewards: Vec<String>,
    pub snapshot: UserProgressionSnapshot,
}

/// 资料字段跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyValue,
    AlreadyCredited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedField {
    pub field: String,
    pub reason: SkipReason,
}

/// 资料字段入账结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFieldResult {
    pub credited_fields: Vec<String>,
    pub skipped_fields: Vec<SkippedField>,
    pub points_awarded: i64,
    pub granted_rewards: Vec<String>,
    pub snapshot: UserProgressionSnapshot,
}

/// 里程碑入账结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneResult {
    /// 为 false 表示该里程碑此前已入账
    pub credited: bool,
    pub points_awarded: i64,
    pub granted_rewards: Vec<String>,
    pub snapshot: UserProgressionSnapshot,
}

/// 单个报名的步骤状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyProgressView {
    pub enrollment_id: String,
    pub journey_id: String,
    pub status: EnrollmentStatus,
    pub steps: Vec<StepState>,
}

/// 用户持有的奖励
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardView {
    pub reward_id: String,
    pub name: String,
    pub reward_type: String,
    pub points: i64,
    pub granted_at: DateTime<Utc>,
}

impl RewardView {
    /// 奖励定义已被删除时以 ID 作为名称
    pub fn from_parts(owned: &UserReward, reward: Option<&Reward>) -> Self {
        Self {
            reward_id: owned.reward_id.clone(),
            name: reward.map_or_else(|| owned.reward_id.clone(), |r| r.name.clone()),
            reward_type: reward.map_or_else(String::new, |r| r.reward_type.clone()),
            points: reward.map_or(0, |r| r.points),
            granted_at: owned.granted_at,
        }
    }
}

/// 资源锁定状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLockView {
    pub resource_id: String,
    pub name: String,
    pub unlocked: bool,
    pub reasons: Vec<LockReason>,
}

/// 用户进度评估结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub user_id: String,
    pub org_id: String,
    pub total_points: i64,
    pub level: LevelProgress,
    pub step_statuses: Vec<JourneyProgressView>,
    pub unlocked_rewards: Vec<RewardView>,
    /// 上次评估之后新获得的奖励，只返回一次
    pub newly_granted_rewards: Vec<RewardView>,
    pub resource_locks: Vec<ResourceLockView>,
    /// 数据完整性告警（等级门槛重复、步骤顺序重复等）
    pub warnings: Vec<String>,
}

/// 条件树预览结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardPreview {
    pub valid: bool,
    pub errors: Vec<Violation>,
    pub suggested_points: i64,
    pub references: TreeReferences,
    /// 指定用户时返回带追踪的评估结果
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<TreeEvaluation>,
}

/// 手动发放结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualGrantResult {
    pub reward_id: String,
    pub granted: bool,
    pub already_owned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
}

/// 单批重算结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// 本批满额时为最后一条的 id，否则为 None 表示已处理完
    pub next_cursor: Option<i64>,
    pub scanned: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

/// 积分重算报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationReport {
    pub org_id: String,
    pub batches: u32,
    pub scanned: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub sample_errors: Vec<String>,
    pub message: String,
}
