//! 资源门控
//!
//! 独立内容资源使用一个顶层操作符组合扁平条件列表。
//! 锁定时按声明顺序为每个未满足的条件返回结构化原因，由调用方负责展示和本地化。

use crate::error::RuleError;
use crate::evaluator::ConditionEvaluator;
use crate::models::{Condition, EvaluationContext};
use crate::operators::{ConditionType, LogicalOperator};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

/// 锁定原因代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReasonCode {
    InsufficientPoints,
    LevelTooLow,
    RewardMissing,
    JourneyIncomplete,
    StepIncomplete,
    ProfileIncomplete,
    InvalidCondition,
}

impl LockReasonCode {
    fn for_type(condition_type: &ConditionType) -> Self {
        match condition_type {
            ConditionType::PointsThreshold => Self::InsufficientPoints,
            ConditionType::LevelRequired => Self::LevelTooLow,
            ConditionType::RewardRequired => Self::RewardMissing,
            ConditionType::JourneyCompleted => Self::JourneyIncomplete,
            ConditionType::StepCompleted => Self::StepIncomplete,
            ConditionType::ProfileCompletion => Self::ProfileIncomplete,
            ConditionType::Unknown(_) => Self::InvalidCondition,
        }
    }
}

/// 单个未满足条件的锁定原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockReason {
    /// 条件在列表中的位置
    pub index: usize,
    pub condition_type: String,
    pub code: LockReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    /// 条件无效时的错误描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 门控结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub unlocked: bool,
    /// 仅在锁定时非空
    pub reasons: Vec<LockReason>,
}

/// 资源门控
pub struct ResourceGate;

impl ResourceGate {
    /// 判断资源是否解锁
    ///
    /// 与条件树不同，这里会评估全部条件，以便一次返回所有锁定原因。
    /// 空 AND 列表视为解锁，空 OR 列表视为锁定。
    pub fn is_unlocked(
        logic: LogicalOperator,
        conditions: &[Condition],
        ctx: &EvaluationContext<'_>,
    ) -> GateDecision {
        let mut reasons = Vec::new();
        let mut any_matched = false;

        for (index, cond) in conditions.iter().enumerate() {
            match ConditionEvaluator::check(cond, ctx) {
                Ok(true) => any_matched = true,
                Ok(false) => reasons.push(Self::reason(index, cond, ctx, None)),
                Err(e) => {
                    warn!(
                        user_id = %ctx.snapshot().user_id,
                        index,
                        error = %e,
                        "资源条件无效，按未满足处理"
                    );
                    reasons.push(Self::reason(index, cond, ctx, Some(e)));
                }
            }
        }

        let unlocked = match logic {
            LogicalOperator::And => reasons.is_empty(),
            LogicalOperator::Or => any_matched,
        };

        if unlocked {
            reasons.clear();
        }

        GateDecision { unlocked, reasons }
    }

    fn reason(
        index: usize,
        cond: &Condition,
        ctx: &EvaluationContext<'_>,
        error: Option<RuleError>,
    ) -> LockReason {
        let snapshot = ctx.snapshot();

        let mut reason = LockReason {
            index,
            condition_type: cond.condition_type.to_string(),
            code: LockReasonCode::for_type(&cond.condition_type),
            reference_id: None,
            required: None,
            actual: None,
            detail: None,
        };

        if let Some(e) = error {
            reason.code = LockReasonCode::InvalidCondition;
            reason.reference_id = cond
                .reference_id
                .clone()
                .or_else(|| cond.step_id.clone())
                .or_else(|| cond.journey_id.clone());
            reason.detail = Some(e.to_string());
            return reason;
        }

        match &cond.condition_type {
            ConditionType::PointsThreshold => {
                reason.required = cond.reference_value.clone();
                reason.actual = Some(json!(snapshot.total_points));
            }
            ConditionType::LevelRequired => {
                reason.reference_id = cond.reference_id.clone();
                reason.required = ConditionEvaluator::level_required_points(cond, ctx)
                    .ok()
                    .map(|p| json!(p));
                reason.actual = Some(json!(snapshot.current_level_min_points()));
            }
            ConditionType::RewardRequired => {
                reason.reference_id = cond.reference_id.clone();
            }
            ConditionType::JourneyCompleted => {
                reason.reference_id = ConditionEvaluator::resolve_journey(cond, ctx)
                    .ok()
                    .map(str::to_string);
            }
            ConditionType::StepCompleted => {
                reason.reference_id = cond.step_id.clone();
            }
            ConditionType::ProfileCompletion => {
                reason.required = Some(json!(true));
                reason.actual = Some(json!(snapshot.profile_complete));
            }
            ConditionType::Unknown(_) => {}
        }

        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LevelMark, LevelThresholds, UserProgressionSnapshot};

    fn levels() -> LevelThresholds {
        LevelThresholds::from([
            ("bronze-id".to_string(), 0),
            ("silver-id".to_string(), 100),
            ("gold-id".to_string(), 300),
        ])
    }

    fn user_with_points(points: i64) -> UserProgressionSnapshot {
        let mut s = UserProgressionSnapshot::new("user-1", "org-1");
        s.total_points = points;
        s.current_level = Some(LevelMark {
            id: "bronze-id".to_string(),
            name: "Bronze".to_string(),
            min_points: 0,
        });
        s
    }

    #[test]
    fn test_or_locked_returns_ordered_reasons() {
        let snap = user_with_points(50);
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let conditions = vec![
            Condition::points_threshold(100),
            Condition::level_required("gold-id"),
        ];

        let decision = ResourceGate::is_unlocked(LogicalOperator::Or, &conditions, &ctx);
        assert!(!decision.unlocked);
        assert_eq!(decision.reasons.len(), 2);

        let first = &decision.reasons[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.code, LockReasonCode::InsufficientPoints);
        assert_eq!(first.required, Some(json!(100)));
        assert_eq!(first.actual, Some(json!(50)));

        let second = &decision.reasons[1];
        assert_eq!(second.index, 1);
        assert_eq!(second.code, LockReasonCode::LevelTooLow);
        assert_eq!(second.reference_id.as_deref(), Some("gold-id"));
        assert_eq!(second.required, Some(json!(300)));
        assert_eq!(second.actual, Some(json!(0)));
    }

    #[test]
    fn test_or_unlocked_clears_reasons() {
        let snap = user_with_points(150);
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let conditions = vec![
            Condition::points_threshold(100),
            Condition::level_required("gold-id"),
        ];

        let decision = ResourceGate::is_unlocked(LogicalOperator::Or, &conditions, &ctx);
        assert!(decision.unlocked);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_and_reports_only_failing_conditions() {
        let mut snap = user_with_points(150);
        snap.completed_step_ids.insert("s1".to_string());
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let conditions = vec![
            Condition::step_completed("s1"),
            Condition::points_threshold(100),
            Condition::profile_completion(),
            Condition::step_completed("s2"),
        ];

        let decision = ResourceGate::is_unlocked(LogicalOperator::And, &conditions, &ctx);
        assert!(!decision.unlocked);
        let indexes: Vec<usize> = decision.reasons.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![2, 3]);
        assert_eq!(decision.reasons[0].code, LockReasonCode::ProfileIncomplete);
        assert_eq!(decision.reasons[1].code, LockReasonCode::StepIncomplete);
    }

    #[test]
    fn test_invalid_condition_never_unlocks() {
        let snap = user_with_points(1000);
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let conditions = vec![Condition::unknown("free_pass"), Condition::level_required("nope")];
        let decision = ResourceGate::is_unlocked(LogicalOperator::Or, &conditions, &ctx);

        assert!(!decision.unlocked);
        assert!(decision
            .reasons
            .iter()
            .all(|r| r.code == LockReasonCode::InvalidCondition && r.detail.is_some()));
    }

    #[test]
    fn test_empty_lists() {
        let snap = user_with_points(0);
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        assert!(ResourceGate::is_unlocked(LogicalOperator::And, &[], &ctx).unlocked);
        assert!(!ResourceGate::is_unlocked(LogicalOperator::Or, &[], &ctx).unlocked);
    }

    #[test]
    fn test_reason_serializes_snake_case_code() {
        let snap = user_with_points(0);
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let decision = ResourceGate::is_unlocked(
            LogicalOperator::And,
            &[Condition::reward_required("r1")],
            &ctx,
        );
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["reasons"][0]["code"], "reward_missing");
        assert_eq!(value["reasons"][0]["reference_id"], "r1");
    }
}
