//! 用户进度快照构建
//!
//! 快照每次从账本和进度存储重新计算，不做缓存。

use tracing::instrument;
use unlock_rules::{LevelThresholds, UserProgressionSnapshot};
use unlock_shared::config::ProgressionConfig;

use crate::error::Result;
use crate::models::{
    Enrollment, EnrollmentStatus, LevelTable, OrgSettings, StepProgress, UserReward,
};
use crate::repository::Stores;

/// 快照及构建过程中读到的原始数据
#[derive(Debug, Clone)]
pub struct UserProgress {
    pub snapshot: UserProgressionSnapshot,
    pub levels: LevelTable,
    pub thresholds: LevelThresholds,
    pub enrollments: Vec<Enrollment>,
    pub step_progress: Vec<StepProgress>,
    pub user_rewards: Vec<UserReward>,
}

#[derive(Clone)]
pub struct SnapshotBuilder {
    stores: Stores,
    config: ProgressionConfig,
}

impl SnapshotBuilder {
    pub fn new(stores: Stores, config: ProgressionConfig) -> Self {
        Self { stores, config }
    }

    #[instrument(skip(self))]
    pub async fn build(&self, user_id: &str, org_id: &str) -> Result<UserProgress> {
        let (total_points, enrollments, step_progress, user_rewards, levels, profile_complete) =
            futures::try_join!(
                self.stores.ledger.total_points(user_id, org_id),
                self.stores.progress.list_enrollments(user_id, org_id),
                self.stores.progress.list_user_step_progress(user_id, org_id),
                self.stores.rewards.list_user_rewards(user_id, org_id),
                self.stores.catalog.list_levels(org_id),
                self.stores.profiles.is_profile_complete(user_id, org_id),
            )?;

        let levels = LevelTable::build(org_id, levels);

        let mut snapshot = UserProgressionSnapshot::new(user_id, org_id);
        snapshot.total_points = total_points;
        snapshot.completed_journey_ids = enrollments
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Completed)
            .map(|e| e.journey_id.clone())
            .collect();
        snapshot.completed_step_ids = step_progress
            .iter()
            .filter(|p| p.is_completed())
            .map(|p| p.step_id.clone())
            .collect();
        snapshot.owned_reward_ids = user_rewards.iter().map(|r| r.reward_id.clone()).collect();
        snapshot.current_level = Some(levels.current(total_points).mark());
        snapshot.profile_complete = profile_complete;

        Ok(UserProgress {
            snapshot,
            thresholds: levels.thresholds(),
            levels,
            enrollments,
            step_progress,
            user_rewards,
        })
    }

    /// 组织设置，未配置时使用默认值
    pub async fn org_settings(&self, org_id: &str) -> Result<OrgSettings> {
        Ok(self
            .stores
            .org_config
            .get_settings(org_id)
            .await?
            .unwrap_or_else(|| OrgSettings::defaults_for(org_id, &self.config)))
    }
}
