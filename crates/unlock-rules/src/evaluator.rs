//! 条件评估器
//!
//! 对单个叶子条件求值。格式错误或无法识别的条件返回错误，
//! 由 [`ConditionEvaluator::evaluate`] 统一降级为 `false` 并记录告警。

use crate::error::{Result, RuleError};
use crate::models::{Condition, EvaluationContext};
use crate::operators::ConditionType;
use serde_json::Value;
use tracing::warn;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件（fail-closed）
    ///
    /// 任何校验错误都视为未满足，并通过 `tracing::warn!` 输出。
    pub fn evaluate(condition: &Condition, ctx: &EvaluationContext<'_>) -> bool {
        match Self::check(condition, ctx) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    user_id = %ctx.snapshot().user_id,
                    condition_type = %condition.condition_type,
                    error = %e,
                    "条件无效，按未满足处理"
                );
                false
            }
        }
    }

    /// 评估条件并保留错误信息
    pub fn check(condition: &Condition, ctx: &EvaluationContext<'_>) -> Result<bool> {
        let snapshot = ctx.snapshot();

        match &condition.condition_type {
            ConditionType::PointsThreshold => {
                let required = Self::points_required(condition)?;
                Ok(snapshot.total_points as f64 >= required)
            }
            ConditionType::LevelRequired => {
                let required = Self::level_required_points(condition, ctx)?;
                Ok(snapshot.current_level_min_points() >= required)
            }
            ConditionType::RewardRequired => {
                let reward_id = Self::required_ref(condition, "reference_id")?;
                Ok(snapshot.owned_reward_ids.contains(reward_id))
            }
            ConditionType::JourneyCompleted => {
                let journey_id = Self::resolve_journey(condition, ctx)?;
                Ok(snapshot.completed_journey_ids.contains(journey_id))
            }
            ConditionType::StepCompleted => {
                let step_id = Self::required_ref(condition, "step_id")?;
                Ok(snapshot.completed_step_ids.contains(step_id))
            }
            ConditionType::ProfileCompletion => Ok(snapshot.profile_complete),
            ConditionType::Unknown(raw) => Err(RuleError::UnknownConditionType(raw.clone())),
        }
    }

    /// 积分阈值（支持数字或数字字符串）
    pub fn points_required(condition: &Condition) -> Result<f64> {
        let value = condition
            .reference_value
            .as_ref()
            .ok_or_else(|| RuleError::MissingReference {
                condition_type: condition.condition_type.to_string(),
                field: "reference_value",
            })?;

        Self::as_f64(value).ok_or_else(|| RuleError::InvalidValue {
            field: "reference_value",
            message: format!("期望数字，实际为 {}", value),
        })
    }

    /// 引用等级的最低积分
    pub fn level_required_points(condition: &Condition, ctx: &EvaluationContext<'_>) -> Result<i64> {
        let level_id = Self::required_ref(condition, "reference_id")?;
        ctx.level_min_points(level_id)
            .ok_or_else(|| RuleError::DanglingReference {
                kind: "level",
                id: level_id.to_string(),
            })
    }

    /// 解析旅程引用：未指定时使用评估上下文中的当前旅程
    pub fn resolve_journey<'a>(
        condition: &'a Condition,
        ctx: &EvaluationContext<'a>,
    ) -> Result<&'a str> {
        condition
            .journey_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(ctx.journey_scope())
            .ok_or(RuleError::UnresolvedSelfReference)
    }

    /// 读取必填的引用字段，空字符串视为缺失
    pub fn required_ref<'a>(condition: &'a Condition, field: &'static str) -> Result<&'a str> {
        let value = match field {
            "reference_id" => condition.reference_id.as_deref(),
            "step_id" => condition.step_id.as_deref(),
            "journey_id" => condition.journey_id.as_deref(),
            _ => None,
        };

        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RuleError::MissingReference {
                condition_type: condition.condition_type.to_string(),
                field,
            })
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LevelMark, LevelThresholds, UserProgressionSnapshot};
    use serde_json::json;

    fn levels() -> LevelThresholds {
        LevelThresholds::from([
            ("bronze".to_string(), 0),
            ("silver".to_string(), 100),
            ("gold".to_string(), 300),
        ])
    }

    fn snapshot() -> UserProgressionSnapshot {
        let mut s = UserProgressionSnapshot::new("user-1", "org-1");
        s.total_points = 250;
        s.current_level = Some(LevelMark {
            id: "silver".to_string(),
            name: "Silver".to_string(),
            min_points: 100,
        });
        s.completed_step_ids.insert("s1".to_string());
        s.completed_journey_ids.insert("j1".to_string());
        s.owned_reward_ids.insert("r1".to_string());
        s
    }

    #[test]
    fn test_points_threshold() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        assert!(ConditionEvaluator::evaluate(&Condition::points_threshold(250), &ctx));
        assert!(!ConditionEvaluator::evaluate(&Condition::points_threshold(251), &ctx));
    }

    #[test]
    fn test_points_threshold_accepts_numeric_string() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let mut cond = Condition::points_threshold(0);
        cond.reference_value = Some(json!(" 200 "));
        assert!(ConditionEvaluator::check(&cond, &ctx).unwrap());

        cond.reference_value = Some(json!("lots"));
        assert!(matches!(
            ConditionEvaluator::check(&cond, &ctx),
            Err(RuleError::InvalidValue { .. })
        ));
        assert!(!ConditionEvaluator::evaluate(&cond, &ctx));
    }

    #[test]
    fn test_level_required_compares_thresholds() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        assert!(ConditionEvaluator::evaluate(&Condition::level_required("bronze"), &ctx));
        assert!(ConditionEvaluator::evaluate(&Condition::level_required("silver"), &ctx));
        assert!(!ConditionEvaluator::evaluate(&Condition::level_required("gold"), &ctx));
    }

    #[test]
    fn test_level_required_dangling_is_fail_closed() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);
        let cond = Condition::level_required("diamond");

        assert!(matches!(
            ConditionEvaluator::check(&cond, &ctx),
            Err(RuleError::DanglingReference { kind: "level", .. })
        ));
        assert!(!ConditionEvaluator::evaluate(&cond, &ctx));
    }

    #[test]
    fn test_reward_and_step_membership() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        assert!(ConditionEvaluator::evaluate(&Condition::reward_required("r1"), &ctx));
        assert!(!ConditionEvaluator::evaluate(&Condition::reward_required("r2"), &ctx));
        assert!(ConditionEvaluator::evaluate(&Condition::step_completed("s1"), &ctx));
        assert!(!ConditionEvaluator::evaluate(&Condition::step_completed("s2"), &ctx));
    }

    #[test]
    fn test_journey_self_reference_uses_scope() {
        let snap = snapshot();
        let lv = levels();
        let cond = Condition::journey_completed(None);

        let unscoped = EvaluationContext::new(&snap, &lv);
        assert!(matches!(
            ConditionEvaluator::check(&cond, &unscoped),
            Err(RuleError::UnresolvedSelfReference)
        ));
        assert!(!ConditionEvaluator::evaluate(&cond, &unscoped));

        let scoped = unscoped.with_journey_scope(Some("j1"));
        assert!(ConditionEvaluator::evaluate(&cond, &scoped));

        let other = unscoped.with_journey_scope(Some("j2"));
        assert!(!ConditionEvaluator::evaluate(&cond, &other));

        // 显式 journey_id 优先于作用域
        assert!(ConditionEvaluator::evaluate(
            &Condition::journey_completed(Some("j1")),
            &other
        ));
    }

    #[test]
    fn test_profile_completion() {
        let mut snap = snapshot();
        let lv = levels();
        assert!(!ConditionEvaluator::evaluate(
            &Condition::profile_completion(),
            &EvaluationContext::new(&snap, &lv)
        ));

        snap.profile_complete = true;
        assert!(ConditionEvaluator::evaluate(
            &Condition::profile_completion(),
            &EvaluationContext::new(&snap, &lv)
        ));
    }

    #[test]
    fn test_unknown_type_is_fail_closed() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);
        let cond = Condition::unknown("always_true");

        assert!(matches!(
            ConditionEvaluator::check(&cond, &ctx),
            Err(RuleError::UnknownConditionType(_))
        ));
        assert!(!ConditionEvaluator::evaluate(&cond, &ctx));
    }

    #[test]
    fn test_missing_reference_is_fail_closed() {
        let snap = snapshot();
        let lv = levels();
        let ctx = EvaluationContext::new(&snap, &lv);

        let mut cond = Condition::step_completed("");
        assert!(matches!(
            ConditionEvaluator::check(&cond, &ctx),
            Err(RuleError::MissingReference { field: "step_id", .. })
        ));

        cond = Condition::reward_required("r1");
        cond.reference_id = None;
        assert!(!ConditionEvaluator::evaluate(&cond, &ctx));
    }
}
