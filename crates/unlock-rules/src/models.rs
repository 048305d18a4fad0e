//! 解锁条件领域模型

use crate::operators::{ConditionType, LogicalOperator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// 叶子条件
///
/// 不同类型使用不同的引用字段：
/// - `points_threshold` 使用 `reference_value`
/// - `level_required` / `reward_required` 使用 `reference_id`
/// - `journey_completed` 使用 `journey_id`（为空表示当前旅程）
/// - `step_completed` 使用 `step_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl Condition {
    fn bare(condition_type: ConditionType) -> Self {
        Self {
            condition_type,
            reference_id: None,
            reference_value: None,
            journey_id: None,
            step_id: None,
        }
    }

    pub fn points_threshold(points: i64) -> Self {
        Self {
            reference_value: Some(Value::from(points)),
            ..Self::bare(ConditionType::PointsThreshold)
        }
    }

    pub fn level_required(level_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(level_id.into()),
            ..Self::bare(ConditionType::LevelRequired)
        }
    }

    pub fn reward_required(reward_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reward_id.into()),
            ..Self::bare(ConditionType::RewardRequired)
        }
    }

    /// `journey_id` 为 `None` 时表示“当前旅程”
    pub fn journey_completed(journey_id: Option<&str>) -> Self {
        Self {
            journey_id: journey_id.map(str::to_string),
            ..Self::bare(ConditionType::JourneyCompleted)
        }
    }

    pub fn step_completed(step_id: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            ..Self::bare(ConditionType::StepCompleted)
        }
    }

    pub fn profile_completion() -> Self {
        Self::bare(ConditionType::ProfileCompletion)
    }

    pub fn unknown(raw_type: impl Into<String>) -> Self {
        Self::bare(ConditionType::Unknown(raw_type.into()))
    }
}

/// 条件树节点：叶子条件或嵌套子树
///
/// 线上格式不带显式标签：带 `operator` 的对象是子树，带 `type` 的对象是叶子。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Tree(ConditionTree),
    Leaf(Condition),
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

impl From<ConditionTree> for ConditionNode {
    fn from(tree: ConditionTree) -> Self {
        Self::Tree(tree)
    }
}

/// AND/OR 条件树
///
/// 空 AND 为真（仅允许手动发放），空 OR 为假。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionTree {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<ConditionNode>,
}

impl ConditionTree {
    pub fn new(operator: LogicalOperator, conditions: Vec<ConditionNode>) -> Self {
        Self {
            operator,
            conditions,
        }
    }

    pub fn and(conditions: Vec<ConditionNode>) -> Self {
        Self::new(LogicalOperator::And, conditions)
    }

    pub fn or(conditions: Vec<ConditionNode>) -> Self {
        Self::new(LogicalOperator::Or, conditions)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// 空 AND 树：只能由运营手动发放
    pub fn is_manual_only(&self) -> bool {
        self.operator == LogicalOperator::And && self.conditions.is_empty()
    }

    /// 深度优先收集所有叶子条件
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        for node in &self.conditions {
            match node {
                ConditionNode::Leaf(condition) => out.push(condition),
                ConditionNode::Tree(tree) => tree.collect_leaves(out),
            }
        }
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// 用户当前所在等级
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelMark {
    pub id: String,
    pub name: String,
    pub min_points: i64,
}

/// 用户进度快照
///
/// 每次评估时从账本和进度存储重新计算，从不持久化。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProgressionSnapshot {
    pub user_id: String,
    pub org_id: String,
    pub total_points: i64,
    pub completed_journey_ids: BTreeSet<String>,
    pub completed_step_ids: BTreeSet<String>,
    pub owned_reward_ids: BTreeSet<String>,
    pub current_level: Option<LevelMark>,
    pub profile_complete: bool,
}

impl UserProgressionSnapshot {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            ..Default::default()
        }
    }

    /// 当前等级门槛（无等级时视为 0）
    pub fn current_level_min_points(&self) -> i64 {
        self.current_level.as_ref().map_or(0, |l| l.min_points)
    }
}

/// 等级 ID -> 最低积分
pub type LevelThresholds = HashMap<String, i64>;

/// 评估上下文
///
/// 组合快照、等级门槛表以及可选的旅程作用域（用于解析“当前旅程”自引用）。
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    snapshot: &'a UserProgressionSnapshot,
    levels: &'a LevelThresholds,
    journey_scope: Option<&'a str>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(snapshot: &'a UserProgressionSnapshot, levels: &'a LevelThresholds) -> Self {
        Self {
            snapshot,
            levels,
            journey_scope: None,
        }
    }

    pub fn with_journey_scope(mut self, journey_id: Option<&'a str>) -> Self {
        self.journey_scope = journey_id;
        self
    }

    pub fn snapshot(&self) -> &'a UserProgressionSnapshot {
        self.snapshot
    }

    pub fn level_min_points(&self, level_id: &str) -> Option<i64> {
        self.levels.get(level_id).copied()
    }

    pub fn journey_scope(&self) -> Option<&'a str> {
        self.journey_scope
    }
}
