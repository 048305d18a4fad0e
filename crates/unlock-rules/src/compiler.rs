//! 条件树编译器
//!
//! 写入时校验条件树（未知类型、缺失引用、悬空引用、嵌套深度），
//! 并预先提取树中引用的步骤、旅程、奖励和等级，供奖励扫描筛选使用。

use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{Condition, ConditionNode, ConditionTree};
use crate::operators::ConditionType;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// 默认最大嵌套深度
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// 引用目录
///
/// 用于校验条件中引用的等级、奖励、旅程、步骤是否存在。
pub trait ReferenceCatalog {
    fn has_level(&self, id: &str) -> bool;
    fn has_reward(&self, id: &str) -> bool;
    fn has_journey(&self, id: &str) -> bool;
    fn has_step(&self, id: &str) -> bool;
}

/// 基于内存集合的引用目录
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    pub levels: HashSet<String>,
    pub rewards: HashSet<String>,
    pub journeys: HashSet<String>,
    pub steps: HashSet<String>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.levels.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_rewards<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rewards.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_journeys<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.journeys.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_steps<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.extend(ids.into_iter().map(Into::into));
        self
    }
}

impl ReferenceCatalog for CatalogIndex {
    fn has_level(&self, id: &str) -> bool {
        self.levels.contains(id)
    }

    fn has_reward(&self, id: &str) -> bool {
        self.rewards.contains(id)
    }

    fn has_journey(&self, id: &str) -> bool {
        self.journeys.contains(id)
    }

    fn has_step(&self, id: &str) -> bool {
        self.steps.contains(id)
    }
}

/// 校验选项
#[derive(Clone, Copy, Default)]
pub struct ValidationOptions<'a> {
    /// 提供时检查悬空引用
    pub catalog: Option<&'a (dyn ReferenceCatalog + Sync)>,
    /// 条件树所属旅程，用于解析未指定 journey_id 的 journey_completed
    pub journey_scope: Option<&'a str>,
}

impl<'a> ValidationOptions<'a> {
    pub fn with_catalog(mut self, catalog: &'a (dyn ReferenceCatalog + Sync)) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_journey_scope(mut self, journey_id: Option<&'a str>) -> Self {
        self.journey_scope = journey_id;
        self
    }
}

/// 单条校验问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl From<Violation> for RuleError {
    fn from(v: Violation) -> Self {
        RuleError::Validation {
            path: v.path,
            message: v.message,
        }
    }
}

/// 条件树中的引用汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeReferences {
    pub step_ids: BTreeSet<String>,
    pub journey_ids: BTreeSet<String>,
    pub reward_ids: BTreeSet<String>,
    pub level_ids: BTreeSet<String>,
    /// 含有未指定 journey_id 的 journey_completed（指向当前旅程）
    pub self_journey: bool,
    pub uses_points: bool,
    pub uses_profile: bool,
    pub unknown_types: BTreeSet<String>,
}

impl TreeReferences {
    pub fn references_step(&self, step_id: &str) -> bool {
        self.step_ids.contains(step_id)
    }

    /// `scope` 为条件树所属旅程
    pub fn references_journey(&self, journey_id: &str, scope: Option<&str>) -> bool {
        self.journey_ids.contains(journey_id) || (self.self_journey && scope == Some(journey_id))
    }

    /// 是否依赖积分、等级、奖励或资料完整度（任意账本变化都可能影响结果）
    pub fn depends_on_ledger(&self) -> bool {
        self.uses_points
            || self.uses_profile
            || !self.level_ids.is_empty()
            || !self.reward_ids.is_empty()
    }
}

/// 编译后的条件树
#[derive(Debug, Clone)]
pub struct CompiledTree {
    pub tree: ConditionTree,
    pub references: TreeReferences,
}

/// 条件树编译器
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    max_depth: usize,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 从 JSON 字符串编译条件树
    pub fn compile_from_json(
        &self,
        json: &str,
        options: &ValidationOptions<'_>,
    ) -> Result<CompiledTree> {
        let tree: ConditionTree =
            serde_json::from_str(json).map_err(|e| RuleError::ParseError(e.to_string()))?;
        self.compile(tree, options)
    }

    /// 校验并编译条件树
    pub fn compile(&self, tree: ConditionTree, options: &ValidationOptions<'_>) -> Result<CompiledTree> {
        self.validate(&tree, options)?;
        let references = Self::extract_references(&tree);
        Ok(CompiledTree { tree, references })
    }

    /// 校验条件树，返回第一个问题
    pub fn validate(&self, tree: &ConditionTree, options: &ValidationOptions<'_>) -> Result<()> {
        match self.collect_violations(tree, options).into_iter().next() {
            Some(v) => Err(v.into()),
            None => Ok(()),
        }
    }

    /// 收集条件树的全部校验问题
    ///
    /// 空逻辑组是合法的：空 AND 表示仅手动发放，空 OR 永不满足。
    pub fn collect_violations(
        &self,
        tree: &ConditionTree,
        options: &ValidationOptions<'_>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.validate_tree(tree, options, "root", 1, &mut violations);
        violations
    }

    fn validate_tree(
        &self,
        tree: &ConditionTree,
        options: &ValidationOptions<'_>,
        path: &str,
        depth: usize,
        violations: &mut Vec<Violation>,
    ) {
        if depth > self.max_depth {
            violations.push(Violation {
                path: path.to_string(),
                message: format!("嵌套深度超过上限 {}", self.max_depth),
            });
            return;
        }

        for (i, child) in tree.conditions.iter().enumerate() {
            let child_path = format!("{}.conditions[{}]", path, i);
            match child {
                ConditionNode::Leaf(cond) => {
                    if let Err(message) = Self::validate_condition(cond, options) {
                        violations.push(Violation {
                            path: child_path,
                            message,
                        });
                    }
                }
                ConditionNode::Tree(sub) => {
                    self.validate_tree(sub, options, &child_path, depth + 1, violations)
                }
            }
        }
    }

    /// 校验单个叶子条件
    pub fn validate_condition(
        cond: &Condition,
        options: &ValidationOptions<'_>,
    ) -> std::result::Result<(), String> {
        let catalog = options.catalog;

        match &cond.condition_type {
            ConditionType::PointsThreshold => {
                let required = ConditionEvaluator::points_required(cond).map_err(|e| e.to_string())?;
                if required < 0.0 {
                    return Err("积分阈值不能为负数".to_string());
                }
            }
            ConditionType::LevelRequired => {
                let id = ConditionEvaluator::required_ref(cond, "reference_id")
                    .map_err(|e| e.to_string())?;
                if catalog.is_some_and(|c| !c.has_level(id)) {
                    return Err(dangling("level", id));
                }
            }
            ConditionType::RewardRequired => {
                let id = ConditionEvaluator::required_ref(cond, "reference_id")
                    .map_err(|e| e.to_string())?;
                if catalog.is_some_and(|c| !c.has_reward(id)) {
                    return Err(dangling("reward", id));
                }
            }
            ConditionType::JourneyCompleted => match cond.journey_id.as_deref() {
                Some(id) if !id.is_empty() => {
                    if catalog.is_some_and(|c| !c.has_journey(id)) {
                        return Err(dangling("journey", id));
                    }
                }
                _ => {
                    if options.journey_scope.is_none() {
                        return Err(RuleError::UnresolvedSelfReference.to_string());
                    }
                }
            },
            ConditionType::StepCompleted => {
                let id = ConditionEvaluator::required_ref(cond, "step_id")
                    .map_err(|e| e.to_string())?;
                if catalog.is_some_and(|c| !c.has_step(id)) {
                    return Err(dangling("step", id));
                }
            }
            ConditionType::ProfileCompletion => {}
            ConditionType::Unknown(raw) => {
                return Err(RuleError::UnknownConditionType(raw.clone()).to_string());
            }
        }

        Ok(())
    }

    /// 提取条件树中的全部引用
    pub fn extract_references(tree: &ConditionTree) -> TreeReferences {
        let mut refs = TreeReferences::default();

        for cond in tree.leaves() {
            match &cond.condition_type {
                ConditionType::PointsThreshold => refs.uses_points = true,
                ConditionType::LevelRequired => {
                    if let Some(id) = &cond.reference_id {
                        refs.level_ids.insert(id.clone());
                    }
                }
                ConditionType::RewardRequired => {
                    if let Some(id) = &cond.reference_id {
                        refs.reward_ids.insert(id.clone());
                    }
                }
                ConditionType::JourneyCompleted => match cond.journey_id.as_deref() {
                    Some(id) if !id.is_empty() => {
                        refs.journey_ids.insert(id.to_string());
                    }
                    _ => refs.self_journey = true,
                },
                ConditionType::StepCompleted => {
                    if let Some(id) = &cond.step_id {
                        refs.step_ids.insert(id.clone());
                    }
                }
                ConditionType::ProfileCompletion => refs.uses_profile = true,
                ConditionType::Unknown(raw) => {
                    refs.unknown_types.insert(raw.clone());
                }
            }
        }

        refs
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn dangling(kind: &'static str, id: &str) -> String {
    RuleError::DanglingReference {
        kind,
        id: id.to_string(),
    }
    .to_string()
}
