//! 解锁引擎
//!
//! 进度相关操作的统一入口。变更操作（完成步骤、资料字段、里程碑）按
//! “写入进度和账本 → 重建快照 → 奖励扫描 → 返回最新状态”的顺序执行；
//! 评估操作只读，不会入账、发放或推进步骤。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};
use unlock_rules::{
    CatalogIndex, ConditionTree, EvaluationContext, ResourceGate, RuleCompiler, TreeExecutor,
    UserProgressionSnapshot, ValidationOptions,
};
use unlock_shared::config::ProgressionConfig;
use unlock_shared::observability::metrics;

use crate::error::{ProgressionError, Result};
use crate::lock::LockManager;
use crate::models::{
    Enrollment, FLOOR_LEVEL_ID, LedgerSourceType, Step, StepProgress, StepStatus, UserReward,
    idempotency,
};
use crate::repository::{AppendOutcome, StepCompletionWrite, StepWriteOutcome, Stores};
use crate::service::dto::{
    CompleteStepCommand, EnrollmentView, EvaluationResult, JourneyProgressView,
    ManualGrantResult, MilestoneResult, ProfileFieldResult, ResourceLockView, RewardPreview,
    RewardView, SkipReason, SkippedField, StepCompletionResult,
};
use crate::service::granter::{GrantOutcome, RewardGranter, SweepTrigger};
use crate::service::ledger::ProgressionLedger;
use crate::service::sequencer::{Completability, StepSequencer};
use crate::service::snapshot::SnapshotBuilder;

/// 加锁后的步骤写入结果
#[derive(Debug)]
struct StepWrite {
    enrollment: Enrollment,
    progress: StepProgress,
    already_completed: bool,
    journey_completed: bool,
    points_awarded: i64,
}

pub struct UnlockEngine {
    stores: Stores,
    snapshots: SnapshotBuilder,
    granter: RewardGranter,
    locks: Arc<LockManager>,
    compiler: RuleCompiler,
}

impl UnlockEngine {
    pub fn new(stores: Stores, locks: Arc<LockManager>, config: ProgressionConfig) -> Self {
        let snapshots = SnapshotBuilder::new(stores.clone(), config.clone());
        let granter = RewardGranter::new(stores.clone(), snapshots.clone(), config.max_sweep_rounds);
        Self {
            stores,
            snapshots,
            granter,
            locks,
            compiler: RuleCompiler::new(),
        }
    }

    pub fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
    }

    /// 报名旅程
    ///
    /// 同一用户对同一旅程只有一条报名记录，重复报名返回已有记录。
    #[instrument(skip(self))]
    pub async fn enroll(&self, user_id: &str, journey_id: &str) -> Result<EnrollmentView> {
        let journey = self
            .stores
            .catalog
            .get_journey(journey_id)
            .await?
            .ok_or_else(|| ProgressionError::JourneyNotFound(journey_id.to_string()))?;

        let steps = self.ordered_steps(journey_id).await?.0;
        if steps.is_empty() {
            return Err(ProgressionError::Validation(format!(
                "旅程 {} 没有任何步骤，无法报名",
                journey_id
            )));
        }

        let enrollment = self
            .stores
            .progress
            .create_enrollment(&Enrollment::start(user_id, journey_id, &journey.org_id))
            .await?;
        let progress = self.stores.progress.list_step_progress(&enrollment.id).await?;

        info!(enrollment_id = %enrollment.id, user_id = %user_id, journey_id = %journey_id, "报名成功");

        Ok(EnrollmentView {
            steps: StepSequencer::derive_states(&steps, &progress),
            enrollment,
        })
    }

    /// 完成步骤
    ///
    /// 完整流程：
    /// 1. 获取报名级锁
    /// 2. 校验报名状态和步骤状态（已完成则幂等返回）
    /// 3. 按组织倍率计算积分
    /// 4. 事务内写入步骤进度、账本条目，最后一步时标记报名完成
    /// 5. 释放锁；遇到并发冲突重试一次，仍冲突且步骤已完成时按幂等成功返回
    /// 6. 奖励扫描（失败不影响主流程，可通过显式扫描补偿）
    /// 7. 重建快照并返回
    #[instrument(skip(self, cmd), fields(enrollment_id = %cmd.enrollment_id, step_id = %cmd.step_id))]
    pub async fn complete_step(&self, cmd: CompleteStepCommand) -> Result<StepCompletionResult> {
        let write = match self.complete_step_with_retry(&cmd).await {
            Ok(write) => write,
            Err(e) => {
                let outcome = match e {
                    ProgressionError::StepLocked { .. } => "locked",
                    _ => "failed",
                };
                metrics::record_step_completion(outcome);
                return Err(e);
            }
        };

        let StepWrite {
            enrollment,
            progress,
            already_completed,
            journey_completed,
            points_awarded,
        } = write;

        let granted_rewards = if already_completed {
            metrics::record_step_completion("already_completed");
            Vec::new()
        } else {
            metrics::record_step_completion("completed");
            info!(
                enrollment_id = %enrollment.id,
                step_id = %cmd.step_id,
                points = points_awarded,
                journey_completed,
                "步骤完成"
            );
            self.sweep_after_mutation(
                &enrollment.user_id,
                &enrollment.org_id,
                SweepTrigger::StepCompleted {
                    step_id: cmd.step_id.clone(),
                    journey_id: enrollment.journey_id.clone(),
                    journey_completed,
                },
            )
            .await
        };

        let snapshot = self.current_snapshot(&enrollment.user_id, &enrollment.org_id).await?;

        Ok(StepCompletionResult {
            progress,
            already_completed,
            journey_completed,
            points_awarded,
            granted_rewards,
            snapshot,
        })
    }

    async fn complete_step_with_retry(&self, cmd: &CompleteStepCommand) -> Result<StepWrite> {
        match self.complete_step_locked(cmd).await {
            Err(e) if Self::is_conflict(&e) => {
                warn!(enrollment_id = %cmd.enrollment_id, step_id = %cmd.step_id, error = %e, "步骤完成冲突，重试一次");
                match self.complete_step_locked(cmd).await {
                    Err(e) if Self::is_conflict(&e) => self.resolve_conflict(cmd, e).await,
                    other => other,
                }
            }
            other => other,
        }
    }

    fn is_conflict(e: &ProgressionError) -> bool {
        matches!(
            e,
            ProgressionError::ConcurrencyConflict | ProgressionError::LockConflict { .. }
        )
    }

    async fn complete_step_locked(&self, cmd: &CompleteStepCommand) -> Result<StepWrite> {
        let lock_key = format!("enrollment:{}", cmd.enrollment_id);
        let guard = self.locks.acquire(&lock_key, None).await?;

        let result = self.apply_step_completion(cmd).await;

        if let Err(e) = guard.release().await {
            warn!(lock_key = %lock_key, error = %e, "释放报名锁失败，等待过期");
        }
        result
    }

    async fn apply_step_completion(&self, cmd: &CompleteStepCommand) -> Result<StepWrite> {
        let enrollment = self.load_enrollment(&cmd.enrollment_id).await?;
        let (steps, _) = self.ordered_steps(&enrollment.journey_id).await?;
        let progress = self.stores.progress.list_step_progress(&enrollment.id).await?;

        let (step, completes_journey) =
            match StepSequencer::check_completion(&enrollment, &steps, &progress, &cmd.step_id)? {
                Completability::AlreadyCompleted(existing) => {
                    debug!(step_id = %cmd.step_id, "步骤已完成，幂等返回");
                    return Ok(StepWrite {
                        points_awarded: existing.points_earned,
                        progress: existing,
                        enrollment,
                        already_completed: true,
                        journey_completed: false,
                    });
                }
                Completability::Available {
                    step,
                    completes_journey,
                } => (step, completes_journey),
            };

        let settings = self.snapshots.org_settings(&enrollment.org_id).await?;
        let award = ProgressionLedger::step_award(step, &settings);
        let now = Utc::now();

        let write = StepCompletionWrite {
            progress: StepProgress {
                enrollment_id: enrollment.id.clone(),
                step_id: step.id.clone(),
                status: StepStatus::Completed,
                points_earned: award.points,
                completed_at: Some(now),
                external_reference: cmd.external_reference.clone(),
                metadata: cmd.metadata.clone(),
            },
            ledger: ProgressionLedger::step_entry(&enrollment, step, award),
            completes_enrollment: completes_journey,
            completed_at: now,
        };

        let outcome = self.stores.progress.record_step_completion(&write).await?;
        Ok(match outcome {
            StepWriteOutcome::Recorded(progress) => StepWrite {
                enrollment,
                progress,
                already_completed: false,
                journey_completed: completes_journey,
                points_awarded: award.points,
            },
            StepWriteOutcome::AlreadyCompleted(existing) => StepWrite {
                points_awarded: existing.points_earned,
                progress: existing,
                enrollment,
                already_completed: true,
                journey_completed: false,
            },
        })
    }

    /// 重试后仍冲突：步骤已由并发请求完成时按幂等成功处理
    async fn resolve_conflict(
        &self,
        cmd: &CompleteStepCommand,
        err: ProgressionError,
    ) -> Result<StepWrite> {
        let enrollment = self.load_enrollment(&cmd.enrollment_id).await?;
        let progress = self.stores.progress.list_step_progress(&enrollment.id).await?;

        match progress
            .into_iter()
            .find(|p| p.step_id == cmd.step_id && p.is_completed())
        {
            Some(existing) => {
                info!(step_id = %cmd.step_id, "并发请求已完成该步骤，按幂等成功返回");
                Ok(StepWrite {
                    points_awarded: existing.points_earned,
                    progress: existing,
                    enrollment,
                    already_completed: true,
                    journey_completed: false,
                })
            }
            None => Err(err),
        }
    }

    /// 资料字段入账
    ///
    /// 每个字段只入账一次；值为空的字段跳过并在结果中说明。
    #[instrument(skip(self, fields))]
    pub async fn complete_profile_fields(
        &self,
        user_id: &str,
        org_id: &str,
        fields: &[String],
    ) -> Result<ProfileFieldResult> {
        let mut seen = HashSet::new();
        let fields: Vec<String> = fields
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty() && seen.insert(f.clone()))
            .collect();
        if fields.is_empty() {
            return Err(ProgressionError::Validation("字段列表不能为空".to_string()));
        }

        let (values, settings) = futures::try_join!(
            self.stores.profiles.get_field_values(user_id, org_id, &fields),
            self.snapshots.org_settings(org_id),
        )?;

        let mut credited_fields = Vec::new();
        let mut skipped_fields = Vec::new();
        let mut points_awarded = 0;

        for field in fields {
            let has_value = values.get(&field).is_some_and(|v| !v.trim().is_empty());
            if !has_value {
                skipped_fields.push(SkippedField {
                    field,
                    reason: SkipReason::EmptyValue,
                });
                continue;
            }

            let entry = ProgressionLedger::flat_entry(
                user_id,
                org_id,
                LedgerSourceType::ProfileField,
                &field,
                settings.profile_field_points,
                idempotency::profile_field(user_id, org_id, &field),
            );
            match self.stores.ledger.append(&entry).await? {
                AppendOutcome::Appended(appended) => {
                    points_awarded += appended.points;
                    credited_fields.push(field);
                }
                AppendOutcome::Duplicate => skipped_fields.push(SkippedField {
                    field,
                    reason: SkipReason::AlreadyCredited,
                }),
            }
        }

        let granted_rewards = if credited_fields.is_empty() {
            Vec::new()
        } else {
            info!(user_id = %user_id, fields = ?credited_fields, points = points_awarded, "资料字段入账");
            self.sweep_after_mutation(user_id, org_id, SweepTrigger::LedgerChanged)
                .await
        };

        Ok(ProfileFieldResult {
            credited_fields,
            skipped_fields,
            points_awarded,
            granted_rewards,
            snapshot: self.current_snapshot(user_id, org_id).await?,
        })
    }

    /// 里程碑入账，每个 key 只入账一次
    #[instrument(skip(self))]
    pub async fn complete_milestone(
        &self,
        user_id: &str,
        org_id: &str,
        milestone_key: &str,
        points: i64,
    ) -> Result<MilestoneResult> {
        let milestone_key = milestone_key.trim();
        if milestone_key.is_empty() {
            return Err(ProgressionError::Validation("里程碑 key 不能为空".to_string()));
        }
        if points < 0 {
            return Err(ProgressionError::Validation("里程碑积分不能为负数".to_string()));
        }

        let entry = ProgressionLedger::flat_entry(
            user_id,
            org_id,
            LedgerSourceType::Milestone,
            milestone_key,
            points,
            idempotency::milestone(user_id, org_id, milestone_key),
        );

        let (credited, points_awarded, granted_rewards) =
            match self.stores.ledger.append(&entry).await? {
                AppendOutcome::Appended(appended) => {
                    info!(user_id = %user_id, milestone_key = %milestone_key, points, "里程碑入账");
                    let granted = self
                        .sweep_after_mutation(user_id, org_id, SweepTrigger::LedgerChanged)
                        .await;
                    (true, appended.points, granted)
                }
                AppendOutcome::Duplicate => (false, 0, Vec::new()),
            };

        Ok(MilestoneResult {
            credited,
            points_awarded,
            granted_rewards,
            snapshot: self.current_snapshot(user_id, org_id).await?,
        })
    }

    /// 评估用户进度
    ///
    /// 只读：不入账、不发放、不推进步骤。唯一的写入是标记新奖励已展示，
    /// 使每个奖励只在 `newly_granted_rewards` 中出现一次。
    #[instrument(skip(self))]
    pub async fn evaluate(&self, user_id: &str, org_id: &str) -> Result<EvaluationResult> {
        let started = Instant::now();

        let (progress, rewards, resources) = futures::try_join!(
            self.snapshots.build(user_id, org_id),
            self.stores.catalog.list_rewards(org_id),
            self.stores.catalog.list_resources(org_id),
        )?;
        let snapshot = &progress.snapshot;
        let mut warnings: Vec<String> = progress.levels.warnings().to_vec();

        // 各报名的步骤状态
        let journey_steps = try_join_all(
            progress
                .enrollments
                .iter()
                .map(|e| self.ordered_steps(&e.journey_id)),
        )
        .await?;

        let mut step_statuses = Vec::with_capacity(progress.enrollments.len());
        for (enrollment, (steps, step_warnings)) in progress.enrollments.iter().zip(journey_steps) {
            warnings.extend(step_warnings);
            let enrollment_progress: Vec<StepProgress> = progress
                .step_progress
                .iter()
                .filter(|p| p.enrollment_id == enrollment.id)
                .cloned()
                .collect();
            step_statuses.push(JourneyProgressView {
                enrollment_id: enrollment.id.clone(),
                journey_id: enrollment.journey_id.clone(),
                status: enrollment.status,
                steps: StepSequencer::derive_states(&steps, &enrollment_progress),
            });
        }

        // 已持有和新获得的奖励
        let reward_index: HashMap<&str, _> = rewards.iter().map(|r| (r.id.as_str(), r)).collect();
        let view = |owned: &UserReward| {
            let reward = reward_index.get(owned.reward_id.as_str()).copied();
            if reward.is_none() {
                warn!(reward_id = %owned.reward_id, "用户持有的奖励定义不存在");
            }
            RewardView::from_parts(owned, reward)
        };
        let unlocked_rewards: Vec<RewardView> = progress.user_rewards.iter().map(view).collect();
        let newly_granted_rewards: Vec<RewardView> = progress
            .user_rewards
            .iter()
            .filter(|r| !r.is_acknowledged())
            .map(view)
            .collect();

        if !newly_granted_rewards.is_empty() {
            let ids: Vec<String> = newly_granted_rewards
                .iter()
                .map(|r| r.reward_id.clone())
                .collect();
            if let Err(e) = self.stores.rewards.acknowledge(user_id, &ids, Utc::now()).await {
                warn!(user_id = %user_id, error = %e, "标记新奖励已展示失败，下次评估将再次返回");
            }
        }

        // 资源门控
        let resource_locks = resources
            .iter()
            .map(|resource| {
                let ctx = EvaluationContext::new(snapshot, &progress.thresholds)
                    .with_journey_scope(resource.journey_id.as_deref());
                let decision =
                    ResourceGate::is_unlocked(resource.unlock_logic, &resource.conditions, &ctx);
                ResourceLockView {
                    resource_id: resource.id.clone(),
                    name: resource.name.clone(),
                    unlocked: decision.unlocked,
                    reasons: decision.reasons,
                }
            })
            .collect();

        let level = ProgressionLedger::level_progress(&progress.levels, snapshot.total_points);

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_evaluation(elapsed);
        debug!(user_id = %user_id, elapsed_secs = elapsed, "评估完成");

        Ok(EvaluationResult {
            user_id: user_id.to_string(),
            org_id: org_id.to_string(),
            total_points: snapshot.total_points,
            level,
            step_statuses,
            unlocked_rewards,
            newly_granted_rewards,
            resource_locks,
            warnings,
        })
    }

    /// 显式奖励扫描，重新评估全部奖励
    #[instrument(skip(self))]
    pub async fn sweep_rewards(&self, user_id: &str, org_id: &str) -> Result<Vec<UserReward>> {
        self.granter.sweep(user_id, org_id, SweepTrigger::All).await
    }

    /// 手动发放奖励
    #[instrument(skip(self))]
    pub async fn grant_reward(
        &self,
        user_id: &str,
        org_id: &str,
        reward_id: &str,
    ) -> Result<ManualGrantResult> {
        let outcome = self.granter.grant_manually(user_id, org_id, reward_id).await?;

        let (granted, already_owned, granted_at) = match &outcome {
            GrantOutcome::Granted(r) => (true, false, Some(r.granted_at)),
            GrantOutcome::AlreadyOwned => (false, true, None),
            GrantOutcome::NotYetEligible => (false, false, None),
        };

        if granted {
            // 手动发放也可能满足其他奖励的 reward_required
            self.sweep_after_mutation(user_id, org_id, SweepTrigger::LedgerChanged)
                .await;
        }

        Ok(ManualGrantResult {
            reward_id: reward_id.to_string(),
            granted,
            already_owned,
            granted_at,
        })
    }

    /// 预览条件树
    ///
    /// 写入前校验（未知类型、缺失引用、悬空引用）并给出建议积分；
    /// 指定用户时额外返回带追踪的评估结果。
    #[instrument(skip(self, tree))]
    pub async fn preview_reward(
        &self,
        org_id: &str,
        tree: &ConditionTree,
        journey_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<RewardPreview> {
        let (levels, rewards, journeys, steps) = futures::try_join!(
            self.stores.catalog.list_levels(org_id),
            self.stores.catalog.list_rewards(org_id),
            self.stores.catalog.list_journeys(org_id),
            self.stores.catalog.list_org_steps(org_id),
        )?;

        let catalog = CatalogIndex::new()
            .with_levels(
                levels
                    .into_iter()
                    .map(|l| l.id)
                    .chain(std::iter::once(FLOOR_LEVEL_ID.to_string())),
            )
            .with_rewards(rewards.into_iter().map(|r| r.id))
            .with_journeys(journeys.into_iter().map(|j| j.id))
            .with_steps(steps.iter().map(|s| s.id.clone()));

        let errors = {
            let options = ValidationOptions::default()
                .with_catalog(&catalog)
                .with_journey_scope(journey_id);
            self.compiler.collect_violations(tree, &options)
        };
        let references = RuleCompiler::extract_references(tree);
        let suggested_points = RewardGranter::suggested_points(&references, &steps, journey_id);

        let evaluation = match user_id {
            Some(user_id) => {
                let progress = self.snapshots.build(user_id, org_id).await?;
                let ctx = EvaluationContext::new(&progress.snapshot, &progress.thresholds)
                    .with_journey_scope(journey_id);
                let evaluation = TreeExecutor::new().with_trace().execute(tree, &ctx);
                debug!(user_id = %user_id, trace = ?evaluation.evaluation_trace, "条件树预览评估");
                Some(evaluation)
            }
            None => None,
        };

        Ok(RewardPreview {
            valid: errors.is_empty(),
            errors,
            suggested_points,
            references,
            evaluation,
        })
    }

    /// 变更后的奖励扫描，失败只记录告警
    async fn sweep_after_mutation(
        &self,
        user_id: &str,
        org_id: &str,
        trigger: SweepTrigger,
    ) -> Vec<String> {
        match self.granter.sweep(user_id, org_id, trigger).await {
            Ok(granted) => granted.into_iter().map(|r| r.reward_id).collect(),
            Err(e) => {
                warn!(user_id = %user_id, org_id = %org_id, error = %e, "奖励扫描失败，可通过显式扫描补偿");
                Vec::new()
            }
        }
    }

    async fn current_snapshot(&self, user_id: &str, org_id: &str) -> Result<UserProgressionSnapshot> {
        Ok(self.snapshots.build(user_id, org_id).await?.snapshot)
    }

    async fn load_enrollment(&self, enrollment_id: &str) -> Result<Enrollment> {
        self.stores
            .progress
            .get_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| ProgressionError::EnrollmentNotFound(enrollment_id.to_string()))
    }

    async fn ordered_steps(&self, journey_id: &str) -> Result<(Vec<Step>, Vec<String>)> {
        let steps = self.stores.catalog.list_steps(journey_id).await?;
        Ok(StepSequencer::order_steps(journey_id, steps))
    }
}
