//! 内存存储
//!
//! 使用 DashMap 实现的内存存储，适用于测试和未配置数据库的开发环境。
//! 需要原子性的复合写入通过一把写锁串行化。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{
    AppendOutcome, CatalogStore, GrantWrite, LedgerStore, OrgConfigStore, ProgressStore,
    StepCompletionWrite, StepWriteOutcome, UserProfileStore, UserRewardStore,
};
use crate::error::Result;
use crate::models::{
    Enrollment, EnrollmentStatus, Journey, LedgerEntry, LedgerSourceType, LedgerUpdate, Level,
    NewLedgerEntry, OrgSettings, Resource, Reward, Step, StepProgress, UserReward,
};

/// 以字符串为键的并发表
#[derive(Debug)]
struct Table<T> {
    data: DashMap<String, T>,
}

impl<T: Clone> Default for Table<T> {
    fn default() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    fn insert(&self, id: &str, value: T) {
        self.data.insert(id.to_string(), value);
    }

    /// 返回数据的克隆，不持有锁
    fn get(&self, id: &str) -> Option<T> {
        self.data.get(id).map(|v| v.clone())
    }

    fn contains(&self, id: &str) -> bool {
        self.data.contains_key(id)
    }

    fn list_by<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.data
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.data.get_mut(id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }
}

fn pair(a: &str, b: &str) -> String {
    format!("{}|{}", a, b)
}

/// 用户资料记录
#[derive(Debug, Clone, Default)]
struct ProfileRecord {
    fields: HashMap<String, String>,
    complete: bool,
}

#[derive(Default)]
struct Inner {
    levels: Table<Level>,
    rewards: Table<Reward>,
    resources: Table<Resource>,
    journeys: Table<Journey>,
    steps: Table<Step>,
    settings: Table<OrgSettings>,
    /// user|org -> 资料
    profiles: Table<ProfileRecord>,

    enrollments: Table<Enrollment>,
    /// user|journey -> enrollment id
    enrollment_index: Table<String>,
    /// enrollment|step -> 完成记录
    step_progress: Table<StepProgress>,
    /// id -> 账本条目
    ledger: Table<LedgerEntry>,
    /// 幂等键 -> 账本 id
    ledger_keys: Table<i64>,
    /// user|reward -> 用户奖励
    user_rewards: Table<UserReward>,

    next_ledger_id: AtomicI64,
    write_lock: Mutex<()>,
}

/// 内存存储，实现全部存储 trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 目录数据写入 ====================

    pub fn insert_level(&self, level: Level) {
        self.inner.levels.insert(&pair(&level.org_id, &level.id), level);
    }

    pub fn insert_reward(&self, reward: Reward) {
        self.inner.rewards.insert(&reward.id.clone(), reward);
    }

    pub fn insert_resource(&self, resource: Resource) {
        self.inner.resources.insert(&resource.id.clone(), resource);
    }

    pub fn insert_journey(&self, journey: Journey) {
        self.inner.journeys.insert(&journey.id.clone(), journey);
    }

    pub fn insert_step(&self, step: Step) {
        self.inner.steps.insert(&step.id.clone(), step);
    }

    pub fn set_org_settings(&self, settings: OrgSettings) {
        self.inner.settings.insert(&settings.org_id.clone(), settings);
    }

    /// 设置用户资料字段和完整度
    pub fn set_profile<I, K, V>(&self, user_id: &str, org_id: &str, fields: I, complete: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record = ProfileRecord {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            complete,
        };
        self.inner.profiles.insert(&pair(user_id, org_id), record);
    }

    pub fn set_enrollment_status(&self, enrollment_id: &str, status: EnrollmentStatus) -> bool {
        self.inner
            .enrollments
            .update(enrollment_id, |e| e.status = status)
    }

    /// 用户在组织内的全部账本条目（按 id 排序）
    pub fn ledger_entries(&self, user_id: &str, org_id: &str) -> Vec<LedgerEntry> {
        let mut entries = self
            .inner
            .ledger
            .list_by(|e| e.user_id == user_id && e.org_id == org_id);
        entries.sort_by_key(|e| e.id);
        entries
    }

    // ==================== 内部写入 ====================

    /// 调用方需持有写锁
    fn append_locked(&self, entry: &NewLedgerEntry, now: DateTime<Utc>) -> AppendOutcome {
        if self.inner.ledger_keys.contains(&entry.idempotency_key) {
            return AppendOutcome::Duplicate;
        }

        let id = self.inner.next_ledger_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = entry.clone().into_entry(id, now);
        self.inner.ledger_keys.insert(&entry.idempotency_key, id);
        self.inner.ledger.insert(&id.to_string(), stored.clone());
        AppendOutcome::Appended(stored)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_levels(&self, org_id: &str) -> Result<Vec<Level>> {
        Ok(self.inner.levels.list_by(|l| l.org_id == org_id))
    }

    async fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>> {
        Ok(self.inner.rewards.get(reward_id))
    }

    async fn list_rewards(&self, org_id: &str) -> Result<Vec<Reward>> {
        let mut rewards = self.inner.rewards.list_by(|r| r.org_id == org_id);
        rewards.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rewards)
    }

    async fn list_resources(&self, org_id: &str) -> Result<Vec<Resource>> {
        let mut resources = self.inner.resources.list_by(|r| r.org_id == org_id);
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }

    async fn get_journey(&self, journey_id: &str) -> Result<Option<Journey>> {
        Ok(self.inner.journeys.get(journey_id))
    }

    async fn list_journeys(&self, org_id: &str) -> Result<Vec<Journey>> {
        Ok(self.inner.journeys.list_by(|j| j.org_id == org_id))
    }

    async fn list_steps(&self, journey_id: &str) -> Result<Vec<Step>> {
        Ok(self.inner.steps.list_by(|s| s.journey_id == journey_id))
    }

    async fn list_org_steps(&self, org_id: &str) -> Result<Vec<Step>> {
        let journey_ids: HashSet<String> = self
            .inner
            .journeys
            .list_by(|j| j.org_id == org_id)
            .into_iter()
            .map(|j| j.id)
            .collect();
        Ok(self
            .inner
            .steps
            .list_by(|s| journey_ids.contains(&s.journey_id)))
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get_enrollment(&self, enrollment_id: &str) -> Result<Option<Enrollment>> {
        Ok(self.inner.enrollments.get(enrollment_id))
    }

    async fn create_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        let _guard = self.inner.write_lock.lock();

        let index_key = pair(&enrollment.user_id, &enrollment.journey_id);
        if let Some(existing) = self
            .inner
            .enrollment_index
            .get(&index_key)
            .and_then(|id| self.inner.enrollments.get(&id))
        {
            return Ok(existing);
        }

        self.inner
            .enrollments
            .insert(&enrollment.id, enrollment.clone());
        self.inner.enrollment_index.insert(&index_key, enrollment.id.clone());
        Ok(enrollment.clone())
    }

    async fn list_enrollments(&self, user_id: &str, org_id: &str) -> Result<Vec<Enrollment>> {
        let mut enrollments = self
            .inner
            .enrollments
            .list_by(|e| e.user_id == user_id && e.org_id == org_id);
        enrollments.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(enrollments)
    }

    async fn list_step_progress(&self, enrollment_id: &str) -> Result<Vec<StepProgress>> {
        Ok(self
            .inner
            .step_progress
            .list_by(|p| p.enrollment_id == enrollment_id))
    }

    async fn list_user_step_progress(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> Result<Vec<StepProgress>> {
        let enrollment_ids: HashSet<String> = self
            .inner
            .enrollments
            .list_by(|e| e.user_id == user_id && e.org_id == org_id)
            .into_iter()
            .map(|e| e.id)
            .collect();
        Ok(self
            .inner
            .step_progress
            .list_by(|p| enrollment_ids.contains(&p.enrollment_id)))
    }

    async fn record_step_completion(
        &self,
        write: &StepCompletionWrite,
    ) -> Result<StepWriteOutcome> {
        let _guard = self.inner.write_lock.lock();

        let key = pair(&write.progress.enrollment_id, &write.progress.step_id);
        if let Some(existing) = self.inner.step_progress.get(&key) {
            if existing.is_completed() {
                return Ok(StepWriteOutcome::AlreadyCompleted(existing));
            }
        }

        self.append_locked(&write.ledger, write.completed_at);
        self.inner.step_progress.insert(&key, write.progress.clone());

        if write.completes_enrollment {
            self.inner
                .enrollments
                .update(&write.progress.enrollment_id, |e| {
                    if e.status == EnrollmentStatus::Active {
                        e.status = EnrollmentStatus::Completed;
                        e.completed_at = Some(write.completed_at);
                    }
                });
        }

        Ok(StepWriteOutcome::Recorded(write.progress.clone()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, entry: &NewLedgerEntry) -> Result<AppendOutcome> {
        let _guard = self.inner.write_lock.lock();
        Ok(self.append_locked(entry, Utc::now()))
    }

    async fn total_points(&self, user_id: &str, org_id: &str) -> Result<i64> {
        Ok(self
            .inner
            .ledger
            .list_by(|e| e.user_id == user_id && e.org_id == org_id)
            .iter()
            .map(|e| e.points)
            .sum())
    }

    async fn list_step_entries_after(
        &self,
        org_id: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.inner.ledger.list_by(|e| {
            e.org_id == org_id
                && e.source_type == LedgerSourceType::StepCompletion
                && e.id > after_id
        });
        entries.sort_by_key(|e| e.id);
        entries.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(entries)
    }

    async fn apply_recalculation(&self, updates: &[LedgerUpdate]) -> Result<u64> {
        let _guard = self.inner.write_lock.lock();
        let now = Utc::now();

        let mut updated = 0;
        for u in updates {
            let id = u.id.to_string();
            let changed = self.inner.ledger.update(&id, |e| {
                e.base_points = u.base_points;
                e.multiplier = u.multiplier;
                e.points = u.points;
                e.updated_at = now;
            });
            if !changed {
                continue;
            }
            updated += 1;

            // 步骤进度上的积分与账本保持一致
            let target = self
                .inner
                .ledger
                .get(&id)
                .and_then(|e| {
                    e.enrollment_id
                        .as_deref()
                        .map(|enrollment_id| pair(enrollment_id, &e.source_ref))
                });
            if let Some(key) = target {
                self.inner.step_progress.update(&key, |p| p.points_earned = u.points);
            }
        }

        Ok(updated)
    }
}

#[async_trait]
impl UserRewardStore for MemoryStore {
    async fn list_user_rewards(&self, user_id: &str, org_id: &str) -> Result<Vec<UserReward>> {
        let mut rewards = self
            .inner
            .user_rewards
            .list_by(|r| r.user_id == user_id && r.org_id == org_id);
        rewards.sort_by(|a, b| a.granted_at.cmp(&b.granted_at).then_with(|| a.reward_id.cmp(&b.reward_id)));
        Ok(rewards)
    }

    async fn grant(
        &self,
        reward: &UserReward,
        ledger: Option<NewLedgerEntry>,
    ) -> Result<GrantWrite> {
        let _guard = self.inner.write_lock.lock();

        let key = pair(&reward.user_id, &reward.reward_id);
        if self.inner.user_rewards.contains(&key) {
            return Ok(GrantWrite::AlreadyOwned);
        }

        if let Some(entry) = ledger {
            self.append_locked(&entry, reward.granted_at);
        }
        self.inner.user_rewards.insert(&key, reward.clone());

        Ok(GrantWrite::Inserted(reward.clone()))
    }

    async fn acknowledge(
        &self,
        user_id: &str,
        reward_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut updated = 0;
        for reward_id in reward_ids {
            self.inner.user_rewards.update(&pair(user_id, reward_id), |r| {
                if r.acknowledged_at.is_none() {
                    r.acknowledged_at = Some(at);
                    updated += 1;
                }
            });
        }
        Ok(updated)
    }
}

#[async_trait]
impl UserProfileStore for MemoryStore {
    async fn is_profile_complete(&self, user_id: &str, org_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .profiles
            .get(&pair(user_id, org_id))
            .is_some_and(|p| p.complete))
    }

    async fn get_field_values(
        &self,
        user_id: &str,
        org_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, String>> {
        let record = self
            .inner
            .profiles
            .get(&pair(user_id, org_id))
            .unwrap_or_default();

        Ok(fields
            .iter()
            .filter_map(|f| record.fields.get(f).map(|v| (f.clone(), v.clone())))
            .collect())
    }
}

#[async_trait]
impl OrgConfigStore for MemoryStore {
    async fn get_settings(&self, org_id: &str) -> Result<Option<OrgSettings>> {
        Ok(self.inner.settings.get(org_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GrantSource, StepStatus, idempotency};

    fn step_write(enrollment: &Enrollment, step_id: &str, points: i64) -> StepCompletionWrite {
        let now = Utc::now();
        StepCompletionWrite {
            progress: StepProgress {
                enrollment_id: enrollment.id.clone(),
                step_id: step_id.to_string(),
                status: StepStatus::Completed,
                points_earned: points,
                completed_at: Some(now),
                external_reference: None,
                metadata: None,
            },
            ledger: NewLedgerEntry {
                user_id: enrollment.user_id.clone(),
                org_id: enrollment.org_id.clone(),
                source_type: LedgerSourceType::StepCompletion,
                source_ref: step_id.to_string(),
                enrollment_id: Some(enrollment.id.clone()),
                base_points: points,
                multiplier: 1.0,
                points,
                idempotency_key: idempotency::step(&enrollment.id, step_id),
            },
            completes_enrollment: false,
            completed_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_enrollment_is_idempotent_per_pair() {
        let store = MemoryStore::new();
        let first = store
            .create_enrollment(&Enrollment::start("u1", "j1", "org-1"))
            .await
            .unwrap();
        let second = store
            .create_enrollment(&Enrollment::start("u1", "j1", "org-1"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_enrollments("u1", "org-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_step_completion_once() {
        let store = MemoryStore::new();
        let enrollment = store
            .create_enrollment(&Enrollment::start("u1", "j1", "org-1"))
            .await
            .unwrap();

        let write = step_write(&enrollment, "s1", 10);
        let first = store.record_step_completion(&write).await.unwrap();
        let second = store.record_step_completion(&write).await.unwrap();

        assert!(matches!(first, StepWriteOutcome::Recorded(_)));
        assert!(matches!(second, StepWriteOutcome::AlreadyCompleted(_)));
        assert_eq!(store.total_points("u1", "org-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_record_step_completion_completes_enrollment() {
        let store = MemoryStore::new();
        let enrollment = store
            .create_enrollment(&Enrollment::start("u1", "j1", "org-1"))
            .await
            .unwrap();

        let mut write = step_write(&enrollment, "s1", 10);
        write.completes_enrollment = true;
        store.record_step_completion(&write).await.unwrap();

        let stored = store.get_enrollment(&enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EnrollmentStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_key() {
        let store = MemoryStore::new();
        let entry = NewLedgerEntry {
            user_id: "u1".to_string(),
            org_id: "org-1".to_string(),
            source_type: LedgerSourceType::Milestone,
            source_ref: "m1".to_string(),
            enrollment_id: None,
            base_points: 5,
            multiplier: 1.0,
            points: 5,
            idempotency_key: idempotency::milestone("u1", "org-1", "m1"),
        };

        assert!(matches!(
            store.append(&entry).await.unwrap(),
            AppendOutcome::Appended(_)
        ));
        assert_eq!(store.append(&entry).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.total_points("u1", "org-1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_grant_and_acknowledge() {
        let store = MemoryStore::new();
        let reward = UserReward::grant("u1", "r1", "org-1", GrantSource::Sweep);

        assert!(matches!(
            store.grant(&reward, None).await.unwrap(),
            GrantWrite::Inserted(_)
        ));
        assert_eq!(
            store.grant(&reward, None).await.unwrap(),
            GrantWrite::AlreadyOwned
        );

        let ids = vec!["r1".to_string()];
        assert_eq!(store.acknowledge("u1", &ids, Utc::now()).await.unwrap(), 1);
        assert_eq!(store.acknowledge("u1", &ids, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyset_pagination_over_step_entries() {
        let store = MemoryStore::new();
        let enrollment = store
            .create_enrollment(&Enrollment::start("u1", "j1", "org-1"))
            .await
            .unwrap();
        for step in ["s1", "s2", "s3"] {
            store
                .record_step_completion(&step_write(&enrollment, step, 10))
                .await
                .unwrap();
        }

        let first = store.list_step_entries_after("org-1", 0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = store
            .list_step_entries_after("org-1", first[1].id, 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].source_ref, "s3");
    }

    #[tokio::test]
    async fn test_profile_field_lookup_skips_missing() {
        let store = MemoryStore::new();
        store.set_profile("u1", "org-1", [("bio", "hello")], false);

        let values = store
            .get_field_values("u1", "org-1", &["bio".to_string(), "avatar".to_string()])
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("bio").map(String::as_str), Some("hello"));
        assert!(!store.is_profile_complete("u1", "org-1").await.unwrap());
    }
}
