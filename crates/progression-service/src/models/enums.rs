//! 进度服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 报名状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    /// 全部步骤完成
    Completed,
    /// 用户退出，步骤不可再完成
    Dropped,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
        }
    }
}

/// 步骤状态
///
/// 由完成记录推导得出，不能直接设置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Locked,
    Available,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::Completed => "completed",
        }
    }
}

/// 积分账本来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum LedgerSourceType {
    /// 完成旅程步骤
    StepCompletion,
    /// 获得奖励附带的积分
    RewardGrant,
    /// 完善资料字段
    ProfileField,
    /// 完成里程碑动作
    Milestone,
}

/// 奖励发放来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum GrantSource {
    /// 完成事件或显式扫描自动发放
    #[default]
    Sweep,
    /// 运营手动发放
    Manual,
}

impl GrantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::Manual => "manual",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_json_format() {
        assert_eq!(
            serde_json::to_string(&LedgerSourceType::StepCompletion).unwrap(),
            "\"step_completion\""
        );
        assert_eq!(serde_json::to_string(&StepStatus::Available).unwrap(), "\"available\"");
        let status: EnrollmentStatus = serde_json::from_str("\"dropped\"").unwrap();
        assert_eq!(status, EnrollmentStatus::Dropped);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for status in [StepStatus::Locked, StepStatus::Available, StepStatus::Completed] {
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert_eq!(GrantSource::Manual.as_str(), "manual");
        assert_eq!(EnrollmentStatus::default().as_str(), "active");
    }
}
