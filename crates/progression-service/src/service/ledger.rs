//! 积分与等级计算

use serde::{Deserialize, Serialize};
use tracing::warn;
use unlock_rules::LevelMark;

use crate::models::{
    Enrollment, LedgerSourceType, LevelTable, NewLedgerEntry, OrgSettings, Step, idempotency,
};

/// 一次入账的积分计算结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointsAward {
    /// 生效的基础积分（base_points 为 0 时取组织默认值）
    pub base_points: i64,
    pub multiplier: f64,
    pub points: i64,
}

/// 用户等级进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub current: LevelMark,
    pub next: Option<LevelMark>,
    pub points_to_next: Option<i64>,
}

pub struct ProgressionLedger;

impl ProgressionLedger {
    pub fn effective_base(step: &Step, settings: &OrgSettings) -> i64 {
        if step.base_points == 0 {
            settings.default_step_points
        } else {
            step.base_points
        }
    }

    /// 倍率无效（非有限值、零或负数）时按 1.0 处理
    pub fn multiplier(settings: &OrgSettings) -> f64 {
        let m = settings.points_multiplier;
        if m.is_finite() && m > 0.0 {
            m
        } else {
            warn!(org_id = %settings.org_id, multiplier = m, "积分倍率无效，按 1.0 处理");
            1.0
        }
    }

    /// floor(有效基础积分 × 倍率)
    pub fn step_award(step: &Step, settings: &OrgSettings) -> PointsAward {
        let base_points = Self::effective_base(step, settings);
        let multiplier = Self::multiplier(settings);
        PointsAward {
            base_points,
            multiplier,
            points: (base_points as f64 * multiplier).floor() as i64,
        }
    }

    pub fn step_entry(enrollment: &Enrollment, step: &Step, award: PointsAward) -> NewLedgerEntry {
        NewLedgerEntry {
            user_id: enrollment.user_id.clone(),
            org_id: enrollment.org_id.clone(),
            source_type: LedgerSourceType::StepCompletion,
            source_ref: step.id.clone(),
            enrollment_id: Some(enrollment.id.clone()),
            base_points: award.base_points,
            multiplier: award.multiplier,
            points: award.points,
            idempotency_key: idempotency::step(&enrollment.id, &step.id),
        }
    }

    /// 不经倍率的直接入账（资料字段、里程碑、奖励附带积分）
    pub fn flat_entry(
        user_id: &str,
        org_id: &str,
        source_type: LedgerSourceType,
        source_ref: &str,
        points: i64,
        idempotency_key: String,
    ) -> NewLedgerEntry {
        NewLedgerEntry {
            user_id: user_id.to_string(),
            org_id: org_id.to_string(),
            source_type,
            source_ref: source_ref.to_string(),
            enrollment_id: None,
            base_points: points,
            multiplier: 1.0,
            points,
            idempotency_key,
        }
    }

    pub fn level_progress(levels: &LevelTable, points: i64) -> LevelProgress {
        LevelProgress {
            current: levels.current(points).mark(),
            next: levels.next(points).map(|l| l.mark()),
            points_to_next: levels.points_to_next(points),
        }
    }
}
