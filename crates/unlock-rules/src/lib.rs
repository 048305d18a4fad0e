//! 解锁条件规则库
//!
//! 提供与存储无关的解锁条件评估能力，支持：
//! - JSON 条件树定义和解析（`{operator, conditions: [...]}`）
//! - 单个叶子条件评估（积分、等级、奖励、旅程、步骤、资料完整度）
//! - AND/OR 条件树短路求值与评估追踪
//! - 写入时校验（未知类型、缺失引用、悬空引用）与引用提取
//! - 资源门控（扁平条件列表 + 结构化锁定原因）
//!
//! 所有评估都是纯函数：输入为用户进度快照，不产生副作用。
//! 无法识别或格式错误的条件一律按未满足处理（fail-closed）。

pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod gate;
pub mod models;
pub mod operators;

pub use compiler::{
    CatalogIndex, CompiledTree, ReferenceCatalog, RuleCompiler, TreeReferences,
    ValidationOptions, Violation,
};
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use executor::{TreeEvaluation, TreeExecutor};
pub use gate::{GateDecision, LockReason, LockReasonCode, ResourceGate};
pub use models::{
    Condition, ConditionNode, ConditionTree, EvaluationContext, LevelMark, LevelThresholds,
    UserProgressionSnapshot,
};
pub use operators::{ConditionType, LogicalOperator};
