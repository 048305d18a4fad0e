//! 等级定义与等级表

use serde::{Deserialize, Serialize};
use tracing::warn;
use unlock_rules::{LevelMark, LevelThresholds};

/// 合成的保底等级 ID
pub const FLOOR_LEVEL_ID: &str = "level-floor";

/// 等级定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub min_points: i64,
    #[sqlx(default)]
    pub icon: Option<String>,
    #[sqlx(default)]
    pub benefits: Vec<String>,
}

impl Level {
    pub fn new(
        id: impl Into<String>,
        org_id: impl Into<String>,
        name: impl Into<String>,
        min_points: i64,
    ) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            name: name.into(),
            min_points,
            icon: None,
            benefits: Vec::new(),
        }
    }

    pub fn mark(&self) -> LevelMark {
        LevelMark {
            id: self.id.clone(),
            name: self.name.clone(),
            min_points: self.min_points,
        }
    }
}

/// 按门槛严格递增排列的等级表
///
/// 构建时保证存在 min_points=0 的保底等级；门槛重复时保留 ID 最小的一条并记录告警。
/// 被去重的等级不参与当前/下一等级计算，但仍可被条件引用。
#[derive(Debug, Clone)]
pub struct LevelTable {
    levels: Vec<Level>,
    shadowed: Vec<Level>,
    warnings: Vec<String>,
}

impl LevelTable {
    pub fn build(org_id: &str, mut levels: Vec<Level>) -> Self {
        let mut warnings = Vec::new();

        levels.retain(|level| {
            if level.min_points < 0 {
                warn!(org_id = %org_id, level_id = %level.id, min_points = level.min_points, "等级门槛为负数，已忽略");
                warnings.push(format!("等级 {} 门槛为负数，已忽略", level.id));
                false
            } else {
                true
            }
        });

        levels.sort_by(|a, b| a.min_points.cmp(&b.min_points).then_with(|| a.id.cmp(&b.id)));

        let mut ordered: Vec<Level> = Vec::with_capacity(levels.len() + 1);
        let mut shadowed = Vec::new();
        for level in levels {
            match ordered.last() {
                Some(prev) if prev.min_points == level.min_points => {
                    warn!(
                        org_id = %org_id,
                        kept = %prev.id,
                        dropped = %level.id,
                        min_points = level.min_points,
                        "等级门槛重复"
                    );
                    warnings.push(format!(
                        "等级 {} 与 {} 门槛重复 ({})，保留 {}",
                        prev.id, level.id, level.min_points, prev.id
                    ));
                    shadowed.push(level);
                }
                _ => ordered.push(level),
            }
        }

        if ordered.first().is_none_or(|l| l.min_points > 0) {
            ordered.insert(0, Level::new(FLOOR_LEVEL_ID, org_id, "Newcomer", 0));
        }

        Self {
            levels: ordered,
            shadowed,
            warnings,
        }
    }

    /// 门槛不超过 `points` 的最高等级
    pub fn current(&self, points: i64) -> &Level {
        self.levels
            .iter()
            .rev()
            .find(|l| l.min_points <= points)
            .unwrap_or(&self.levels[0])
    }

    /// 门槛高于 `points` 的最低等级
    pub fn next(&self, points: i64) -> Option<&Level> {
        self.levels.iter().find(|l| l.min_points > points)
    }

    pub fn points_to_next(&self, points: i64) -> Option<i64> {
        self.next(points).map(|l| l.min_points - points)
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// 条件求值用的门槛表（包含保底等级与门槛重复被去重的等级）
    pub fn thresholds(&self) -> LevelThresholds {
        self.levels
            .iter()
            .chain(&self.shadowed)
            .map(|l| (l.id.clone(), l.min_points))
            .collect()
    }
}
