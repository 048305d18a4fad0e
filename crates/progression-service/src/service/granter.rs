//! 奖励发放
//!
//! 奖励一旦发放永久持有。扫描在每次状态变更后执行，
//! 只重新评估可能受本次变更影响的奖励，并循环到不再有新发放为止，
//! 以处理 reward_required 形成的链式依赖。

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, instrument, warn};
use unlock_rules::{EvaluationContext, RuleCompiler, TreeExecutor, TreeReferences};
use unlock_shared::observability::metrics;

use crate::error::{ProgressionError, Result};
use crate::models::{GrantSource, LedgerSourceType, Reward, Step, UserReward, idempotency};
use crate::repository::{GrantWrite, Stores};
use crate::service::ledger::ProgressionLedger;
use crate::service::snapshot::{SnapshotBuilder, UserProgress};

/// 单个奖励的发放结果
#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    Granted(UserReward),
    AlreadyOwned,
    NotYetEligible,
}

/// 触发扫描的状态变更
#[derive(Debug, Clone, PartialEq)]
pub enum SweepTrigger {
    /// 重新评估全部奖励
    All,
    StepCompleted {
        step_id: String,
        journey_id: String,
        journey_completed: bool,
    },
    /// 积分、奖励或资料变化
    LedgerChanged,
}

impl SweepTrigger {
    fn affects(&self, refs: &TreeReferences, reward: &Reward) -> bool {
        match self {
            SweepTrigger::All => true,
            SweepTrigger::StepCompleted {
                step_id,
                journey_id,
                journey_completed,
            } => {
                refs.references_step(step_id)
                    || (*journey_completed
                        && refs.references_journey(journey_id, reward.journey_id.as_deref()))
                    || refs.depends_on_ledger()
            }
            SweepTrigger::LedgerChanged => refs.depends_on_ledger(),
        }
    }
}

#[derive(Clone)]
pub struct RewardGranter {
    stores: Stores,
    snapshots: SnapshotBuilder,
    max_rounds: u32,
}

impl RewardGranter {
    pub fn new(stores: Stores, snapshots: SnapshotBuilder, max_rounds: u32) -> Self {
        Self {
            stores,
            snapshots,
            max_rounds: max_rounds.max(1),
        }
    }

    /// 评估并尝试发放单个奖励
    ///
    /// 条件满足时在同一事务内写入奖励和附带积分；已持有时不重复写入。
    #[instrument(skip(self, reward, progress), fields(reward_id = %reward.id, user_id = %progress.snapshot.user_id))]
    pub async fn try_grant(
        &self,
        reward: &Reward,
        progress: &UserProgress,
        source: GrantSource,
    ) -> Result<GrantOutcome> {
        let snapshot = &progress.snapshot;
        if snapshot.owned_reward_ids.contains(&reward.id) {
            return Ok(GrantOutcome::AlreadyOwned);
        }

        let ctx = EvaluationContext::new(snapshot, &progress.thresholds)
            .with_journey_scope(reward.journey_id.as_deref());
        let evaluation = TreeExecutor::new().execute(&reward.unlock_condition, &ctx);
        for warning in &evaluation.warnings {
            warn!(reward_id = %reward.id, warning = %warning, "奖励条件评估告警");
        }

        if !evaluation.matched {
            return Ok(GrantOutcome::NotYetEligible);
        }

        let user_reward =
            UserReward::grant(&snapshot.user_id, &reward.id, &snapshot.org_id, source);
        let ledger = (reward.points > 0).then(|| {
            ProgressionLedger::flat_entry(
                &snapshot.user_id,
                &snapshot.org_id,
                LedgerSourceType::RewardGrant,
                &reward.id,
                reward.points,
                idempotency::reward(&snapshot.user_id, &snapshot.org_id, &reward.id),
            )
        });

        match self.stores.rewards.grant(&user_reward, ledger).await? {
            GrantWrite::Inserted(granted) => {
                metrics::record_reward_grant(source.as_str());
                info!(
                    reward_id = %reward.id,
                    user_id = %snapshot.user_id,
                    points = reward.points,
                    source = source.as_str(),
                    "奖励发放成功"
                );
                Ok(GrantOutcome::Granted(granted))
            }
            GrantWrite::AlreadyOwned => Ok(GrantOutcome::AlreadyOwned),
        }
    }

    /// 运营手动发放
    ///
    /// 仍然评估条件；空 AND 树在这里视为满足，而自动扫描永远不会发放它。
    #[instrument(skip(self))]
    pub async fn grant_manually(
        &self,
        user_id: &str,
        org_id: &str,
        reward_id: &str,
    ) -> Result<GrantOutcome> {
        let reward = self
            .stores
            .catalog
            .get_reward(reward_id)
            .await?
            .filter(|r| r.org_id == org_id)
            .ok_or_else(|| ProgressionError::RewardNotFound(reward_id.to_string()))?;

        let progress = self.snapshots.build(user_id, org_id).await?;
        self.try_grant(&reward, &progress, GrantSource::Manual).await
    }

    /// 奖励扫描
    ///
    /// 1. 读取组织全部奖励并提取引用
    /// 2. 排除仅手动发放和已持有的奖励
    /// 3. 按触发条件筛选受影响的奖励并逐个尝试发放
    /// 4. 有新发放时重建快照，再扫描依赖账本的奖励，直到没有新发放或达到轮数上限
    #[instrument(skip(self))]
    pub async fn sweep(
        &self,
        user_id: &str,
        org_id: &str,
        trigger: SweepTrigger,
    ) -> Result<Vec<UserReward>> {
        let rewards = self.stores.catalog.list_rewards(org_id).await?;
        let candidates: Vec<(Reward, TreeReferences)> = rewards
            .into_iter()
            .filter(|r| !r.unlock_condition.is_manual_only())
            .map(|r| {
                let refs = RuleCompiler::extract_references(&r.unlock_condition);
                (r, refs)
            })
            .collect();

        let mut granted = Vec::new();
        let mut trigger = trigger;

        for round in 0..self.max_rounds {
            let progress = self.snapshots.build(user_id, org_id).await?;
            let mut granted_this_round = 0;

            for (reward, refs) in &candidates {
                if progress.snapshot.owned_reward_ids.contains(&reward.id)
                    || !trigger.affects(refs, reward)
                {
                    continue;
                }

                if let GrantOutcome::Granted(user_reward) =
                    self.try_grant(reward, &progress, GrantSource::Sweep).await?
                {
                    granted.push(user_reward);
                    granted_this_round += 1;
                }
            }

            debug!(round, granted = granted_this_round, "奖励扫描轮次完成");
            if granted_this_round == 0 {
                return Ok(granted);
            }
            trigger = SweepTrigger::LedgerChanged;
        }

        warn!(
            user_id = %user_id,
            org_id = %org_id,
            max_rounds = self.max_rounds,
            "奖励扫描达到轮数上限，剩余链式奖励将在下次扫描发放"
        );
        Ok(granted)
    }

    /// 引用步骤与引用旅程内全部步骤的 base_points 之和，每个步骤只计一次
    pub fn suggested_points(
        refs: &TreeReferences,
        steps: &[Step],
        journey_scope: Option<&str>,
    ) -> i64 {
        let mut journeys: BTreeSet<&str> = refs.journey_ids.iter().map(String::as_str).collect();
        if refs.self_journey {
            journeys.extend(journey_scope);
        }

        let counted: HashMap<&str, i64> = steps
            .iter()
            .filter(|s| refs.references_step(&s.id) || journeys.contains(s.journey_id.as_str()))
            .map(|s| (s.id.as_str(), s.base_points))
            .collect();

        counted.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unlock_rules::{Condition, ConditionNode, ConditionTree};

    fn leaf(c: Condition) -> ConditionNode {
        ConditionNode::Leaf(c)
    }

    fn steps() -> Vec<Step> {
        vec![
            Step::new("s1", "j1", 1, 10),
            Step::new("s2", "j1", 2, 20),
            Step::new("s3", "j2", 1, 40),
        ]
    }

    #[test]
    fn test_suggested_points_counts_each_step_once() {
        let tree = ConditionTree::and(vec![
            leaf(Condition::step_completed("s1")),
            leaf(Condition::journey_completed(Some("j1"))),
        ]);
        let refs = RuleCompiler::extract_references(&tree);
        assert_eq!(RewardGranter::suggested_points(&refs, &steps(), None), 30);
    }

    #[test]
    fn test_suggested_points_self_journey_uses_scope() {
        let tree = ConditionTree::and(vec![leaf(Condition::journey_completed(None))]);
        let refs = RuleCompiler::extract_references(&tree);
        assert_eq!(RewardGranter::suggested_points(&refs, &steps(), Some("j2")), 40);
        assert_eq!(RewardGranter::suggested_points(&refs, &steps(), None), 0);
    }

    #[test]
    fn test_trigger_filters_unrelated_rewards() {
        let step_tree = ConditionTree::and(vec![leaf(Condition::step_completed("s2"))]);
        let points_tree = ConditionTree::and(vec![leaf(Condition::points_threshold(100))]);
        let step_reward = Reward::new("r-step", "org-1", step_tree.clone());
        let points_reward = Reward::new("r-points", "org-1", points_tree.clone());

        let trigger = SweepTrigger::StepCompleted {
            step_id: "s1".to_string(),
            journey_id: "j1".to_string(),
            journey_completed: false,
        };
        assert!(!trigger.affects(&RuleCompiler::extract_references(&step_tree), &step_reward));
        assert!(trigger.affects(&RuleCompiler::extract_references(&points_tree), &points_reward));

        assert!(!SweepTrigger::LedgerChanged
            .affects(&RuleCompiler::extract_references(&step_tree), &step_reward));
        assert!(SweepTrigger::All.affects(&RuleCompiler::extract_references(&step_tree), &step_reward));
    }

    #[test]
    fn test_trigger_journey_completion_uses_reward_scope() {
        let tree = ConditionTree::and(vec![leaf(Condition::journey_completed(None))]);
        let reward = Reward::new("r1", "org-1", tree.clone()).with_journey("j1");
        let refs = RuleCompiler::extract_references(&tree);

        let completed = SweepTrigger::StepCompleted {
            step_id: "s2".to_string(),
            journey_id: "j1".to_string(),
            journey_completed: true,
        };
        assert!(completed.affects(&refs, &reward));

        let not_completed = SweepTrigger::StepCompleted {
            step_id: "s1".to_string(),
            journey_id: "j1".to_string(),
            journey_completed: false,
        };
        assert!(!not_completed.affects(&refs, &reward));
    }
}
