//! 运营配置的目录实体
//!
//! 旅程、步骤、奖励、资源和组织设置由管理端维护，本服务只读。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unlock_rules::{Condition, ConditionTree, LogicalOperator};
use unlock_shared::config::ProgressionConfig;

/// 旅程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Journey {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Journey {
    pub fn new(id: impl Into<String>, org_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// 旅程步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub journey_id: String,
    pub name: String,
    pub step_type: String,
    /// 为 0 时使用组织的默认步骤积分
    pub base_points: i64,
    pub order_index: i32,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        journey_id: impl Into<String>,
        order_index: i32,
        base_points: i64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            journey_id: journey_id.into(),
            step_type: "task".to_string(),
            base_points,
            order_index,
        }
    }
}

/// 奖励定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub reward_type: String,
    /// 发放时附带的积分
    pub points: i64,
    pub unlock_condition: ConditionTree,
    /// 条件树中“当前旅程”所指的旅程
    pub journey_id: Option<String>,
}

impl Reward {
    pub fn new(
        id: impl Into<String>,
        org_id: impl Into<String>,
        unlock_condition: ConditionTree,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            org_id: org_id.into(),
            reward_type: "badge".to_string(),
            points: 0,
            unlock_condition,
            journey_id: None,
        }
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points = points;
        self
    }

    pub fn with_journey(mut self, journey_id: impl Into<String>) -> Self {
        self.journey_id = Some(journey_id.into());
        self
    }
}

/// 独立内容资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub unlock_logic: LogicalOperator,
    pub conditions: Vec<Condition>,
    pub points_on_completion: i64,
    pub journey_id: Option<String>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        org_id: impl Into<String>,
        unlock_logic: LogicalOperator,
        conditions: Vec<Condition>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            org_id: org_id.into(),
            unlock_logic,
            conditions,
            points_on_completion: 0,
            journey_id: None,
        }
    }
}

/// 组织积分设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrgSettings {
    pub org_id: String,
    pub points_multiplier: f64,
    pub default_step_points: i64,
    pub profile_field_points: i64,
}

impl OrgSettings {
    /// 组织未配置时的默认值
    pub fn defaults_for(org_id: impl Into<String>, config: &ProgressionConfig) -> Self {
        Self {
            org_id: org_id.into(),
            points_multiplier: config.default_points_multiplier,
            default_step_points: config.default_step_points,
            profile_field_points: config.profile_field_points,
        }
    }
}
