//! 条件类型与逻辑操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 叶子条件类型
///
/// 反序列化时保留无法识别的类型字符串（`Unknown`），
/// 以便校验阶段报告、评估阶段按未满足处理，而不是整棵树解析失败。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    /// 累计积分达到阈值
    PointsThreshold,
    /// 当前等级不低于指定等级
    LevelRequired,
    /// 已持有指定奖励
    RewardRequired,
    /// 已完成指定旅程（未指定时指当前旅程）
    JourneyCompleted,
    /// 已完成指定步骤
    StepCompleted,
    /// 用户资料已完整
    ProfileCompletion,
    /// 无法识别的类型
    Unknown(String),
}

impl ConditionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PointsThreshold => "points_threshold",
            Self::LevelRequired => "level_required",
            Self::RewardRequired => "reward_required",
            Self::JourneyCompleted => "journey_completed",
            Self::StepCompleted => "step_completed",
            Self::ProfileCompletion => "profile_completion",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for ConditionType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "points_threshold" => Self::PointsThreshold,
            "level_required" => Self::LevelRequired,
            "reward_required" => Self::RewardRequired,
            "journey_completed" => Self::JourneyCompleted,
            "step_completed" => Self::StepCompleted,
            "profile_completion" => Self::ProfileCompletion,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<ConditionType> for String {
    fn from(value: ConditionType) -> Self {
        match value {
            ConditionType::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}
