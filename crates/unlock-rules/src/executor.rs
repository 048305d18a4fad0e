//! 条件树执行器
//!
//! 实现条件树的短路求值，返回匹配结果、告警和评估追踪信息。

use crate::evaluator::ConditionEvaluator;
use crate::models::{Condition, ConditionNode, ConditionTree, EvaluationContext};
use crate::operators::LogicalOperator;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 条件树评估结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeEvaluation {
    pub matched: bool,
    /// 求值过程中满足的叶子条件（按路径描述）
    pub matched_conditions: Vec<String>,
    /// 无效条件告警，条件本身按未满足处理
    pub warnings: Vec<String>,
    pub evaluation_trace: Vec<String>,
}

/// 条件树执行器
#[derive(Debug, Clone, Default)]
pub struct TreeExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl TreeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 执行条件树评估
    pub fn execute(&self, tree: &ConditionTree, ctx: &EvaluationContext<'_>) -> TreeEvaluation {
        let mut result = TreeEvaluation::default();
        let matched = self.evaluate_tree(tree, ctx, &mut result, "root");
        result.matched = matched;
        result
    }

    /// 仅返回是否匹配
    pub fn matches(tree: &ConditionTree, ctx: &EvaluationContext<'_>) -> bool {
        Self::new().execute(tree, ctx).matched
    }

    fn evaluate_node(
        &self,
        node: &ConditionNode,
        ctx: &EvaluationContext<'_>,
        result: &mut TreeEvaluation,
        path: &str,
    ) -> bool {
        match node {
            ConditionNode::Leaf(cond) => self.evaluate_condition(cond, ctx, result, path),
            ConditionNode::Tree(tree) => self.evaluate_tree(tree, ctx, result, path),
        }
    }

    fn evaluate_condition(
        &self,
        cond: &Condition,
        ctx: &EvaluationContext<'_>,
        result: &mut TreeEvaluation,
        path: &str,
    ) -> bool {
        let matched = match ConditionEvaluator::check(cond, ctx) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    user_id = %ctx.snapshot().user_id,
                    path = %path,
                    error = %e,
                    "条件无效，按未满足处理"
                );
                result.warnings.push(format!("{}: {}", path, e));
                false
            }
        };

        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: {} => {}",
                path,
                Self::describe(cond),
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if matched {
            result
                .matched_conditions
                .push(format!("{}.{}", path, Self::describe(cond)));
        }

        matched
    }

    /// 评估逻辑组（短路求值）
    fn evaluate_tree(
        &self,
        tree: &ConditionTree,
        ctx: &EvaluationContext<'_>,
        result: &mut TreeEvaluation,
        path: &str,
    ) -> bool {
        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: 开始评估 {} 组 (共 {} 个子节点)",
                path,
                tree.operator,
                tree.conditions.len()
            ));
        }

        match tree.operator {
            LogicalOperator::And => {
                // 空 AND 为真
                for (i, child) in tree.conditions.iter().enumerate() {
                    let child_path = format!("{}.conditions[{}]", path, i);
                    if !self.evaluate_node(child, ctx, result, &child_path) {
                        if self.trace_enabled {
                            result
                                .evaluation_trace
                                .push(format!("{}: AND 短路 - 子节点 {} 不匹配", path, i));
                        }
                        return false;
                    }
                }

                if self.trace_enabled {
                    result
                        .evaluation_trace
                        .push(format!("{}: AND 组全部匹配", path));
                }
                true
            }
            LogicalOperator::Or => {
                // 空 OR 为假
                for (i, child) in tree.conditions.iter().enumerate() {
                    let child_path = format!("{}.conditions[{}]", path, i);
                    if self.evaluate_node(child, ctx, result, &child_path) {
                        if self.trace_enabled {
                            result
                                .evaluation_trace
                                .push(format!("{}: OR 短路 - 子节点 {} 匹配", path, i));
                        }
                        return true;
                    }
                }

                if self.trace_enabled {
                    result
                        .evaluation_trace
                        .push(format!("{}: OR 组无匹配", path));
                }
                false
            }
        }
    }

    fn describe(cond: &Condition) -> String {
        let reference = cond
            .step_id
            .as_deref()
            .or(cond.journey_id.as_deref())
            .or(cond.reference_id.as_deref())
            .map(str::to_string)
            .or_else(|| cond.reference_value.as_ref().map(|v| v.to_string()));

        match reference {
            Some(r) => format!("{}({})", cond.condition_type, r),
            None => cond.condition_type.to_string(),
        }
    }
}
