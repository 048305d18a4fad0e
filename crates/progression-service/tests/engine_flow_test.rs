//! 解锁引擎流程集成测试
//!
//! 基于内存存储驱动完整的进度流程，无需外部依赖

use std::sync::Arc;

use progression::error::ProgressionError;
use progression::lock::{LockConfig, LockManager};
use progression::models::{
    EnrollmentStatus, Journey, LedgerSourceType, Level, OrgSettings, Resource, Reward, Step,
    StepStatus,
};
use progression::repository::{MemoryStore, Stores};
use progression::service::{
    CompleteStepCommand, RecalculationService, SkipReason, StepState, UnlockEngine,
};
use unlock_rules::{Condition, ConditionNode, ConditionTree, LockReasonCode, LogicalOperator};
use unlock_shared::config::ProgressionConfig;

const ORG: &str = "org-1";

// ==================== 测试辅助 ====================

struct Fixture {
    store: MemoryStore,
    engine: Arc<UnlockEngine>,
    recalculation: RecalculationService,
}

impl Fixture {
    fn new() -> Self {
        let store = MemoryStore::new();
        store.insert_journey(Journey::new("j1", ORG, "Onboarding"));
        store.insert_step(Step::new("s1", "j1", 1, 10));
        store.insert_step(Step::new("s2", "j1", 2, 20));
        store.insert_step(Step::new("s3", "j1", 3, 30));
        store.insert_level(Level::new("bronze", "org-1", "Bronze", 0));
        store.insert_level(Level::new("silver", "org-1", "Silver", 100));
        store.insert_level(Level::new("gold", "org-1", "Gold", 300));

        let config = ProgressionConfig::default();
        let stores = Stores::from_backend(Arc::new(store.clone()));
        let locks = Arc::new(LockManager::local(LockConfig::default()));

        Self {
            engine: Arc::new(UnlockEngine::new(stores.clone(), locks, config.clone())),
            recalculation: RecalculationService::new(stores, &config),
            store,
        }
    }

    fn set_multiplier(&self, multiplier: f64) {
        self.store.set_org_settings(OrgSettings {
            org_id: ORG.to_string(),
            points_multiplier: multiplier,
            default_step_points: 10,
            profile_field_points: 5,
        });
    }

    async fn enroll(&self, user_id: &str) -> String {
        self.engine.enroll(user_id, "j1").await.unwrap().enrollment.id
    }

    async fn complete(&self, enrollment_id: &str, step_id: &str) {
        self.engine
            .complete_step(CompleteStepCommand::new(enrollment_id, step_id))
            .await
            .unwrap();
    }
}

fn leaf(condition: Condition) -> ConditionNode {
    ConditionNode::Leaf(condition)
}

fn statuses(steps: &[StepState]) -> Vec<StepStatus> {
    steps.iter().map(|s| s.status).collect()
}

// ==================== 报名与步骤顺序 ====================

#[tokio::test]
async fn test_enroll_is_idempotent_and_first_step_available() {
    let fx = Fixture::new();

    let first = fx.engine.enroll("u1", "j1").await.unwrap();
    let second = fx.engine.enroll("u1", "j1").await.unwrap();

    assert_eq!(first.enrollment.id, second.enrollment.id);
    assert_eq!(
        statuses(&first.steps),
        vec![StepStatus::Available, StepStatus::Locked, StepStatus::Locked]
    );
}

#[tokio::test]
async fn test_locked_step_rejected() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;

    let err = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s2"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProgressionError::StepLocked { .. }));
    assert_eq!(err.error_code(), "STEP_LOCKED");
    assert!(fx.store.ledger_entries("u1", ORG).is_empty());
}

#[tokio::test]
async fn test_complete_step_is_idempotent() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;

    let mut cmd = CompleteStepCommand::new(&id, "s1");
    cmd.external_reference = Some("lms-42".to_string());

    let first = fx.engine.complete_step(cmd.clone()).await.unwrap();
    let second = fx.engine.complete_step(cmd).await.unwrap();

    assert!(!first.already_completed);
    assert!(second.already_completed);
    assert_eq!(first.progress, second.progress);
    assert_eq!(first.progress.external_reference.as_deref(), Some("lms-42"));
    assert_eq!(second.snapshot.total_points, 10);
    assert_eq!(fx.store.ledger_entries("u1", ORG).len(), 1);
}

#[tokio::test]
async fn test_concurrent_completions_credit_once() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = fx.engine.clone();
            let id = id.clone();
            tokio::spawn(async move {
                engine
                    .complete_step(CompleteStepCommand::new(id, "s1"))
                    .await
            })
        })
        .collect();

    let mut fresh = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        if !result.already_completed {
            fresh += 1;
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(fx.store.ledger_entries("u1", ORG).len(), 1);
}

#[tokio::test]
async fn test_last_step_completes_journey() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;
    fx.complete(&id, "s2").await;

    let last = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s3"))
        .await
        .unwrap();

    assert!(last.journey_completed);
    assert!(last.snapshot.completed_journey_ids.contains("j1"));

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert_eq!(evaluation.step_statuses[0].status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn test_dropped_enrollment_cannot_progress() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;
    assert!(fx.store.set_enrollment_status(&id, EnrollmentStatus::Dropped));

    let err = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressionError::EnrollmentInactive { .. }));
}

#[tokio::test]
async fn test_unknown_enrollment_and_step() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;

    assert!(matches!(
        fx.engine
            .complete_step(CompleteStepCommand::new("missing", "s1"))
            .await,
        Err(ProgressionError::EnrollmentNotFound(_))
    ));
    assert!(matches!(
        fx.engine
            .complete_step(CompleteStepCommand::new(&id, "ghost"))
            .await,
        Err(ProgressionError::StepNotFound { .. })
    ));
}

// ==================== 奖励发放 ====================

#[tokio::test]
async fn test_newly_granted_reported_once() {
    let fx = Fixture::new();
    fx.store.insert_reward(Reward::new(
        "r1",
        ORG,
        ConditionTree::and(vec![leaf(Condition::step_completed("s1"))]),
    ));
    let id = fx.enroll("u1").await;

    let result = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s1"))
        .await
        .unwrap();
    assert_eq!(result.granted_rewards, vec!["r1".to_string()]);

    let first = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert_eq!(first.newly_granted_rewards.len(), 1);
    assert_eq!(first.newly_granted_rewards[0].reward_id, "r1");

    let second = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert!(second.newly_granted_rewards.is_empty());
    assert_eq!(second.unlocked_rewards.len(), 1);
}

#[tokio::test]
async fn test_reward_chain_granted_in_one_sweep() {
    let fx = Fixture::new();
    fx.store.insert_reward(
        Reward::new(
            "starter",
            ORG,
            ConditionTree::and(vec![leaf(Condition::step_completed("s1"))]),
        )
        .with_points(100),
    );
    fx.store.insert_reward(Reward::new(
        "collector",
        ORG,
        ConditionTree::and(vec![leaf(Condition::reward_required("starter"))]),
    ));
    fx.store.insert_reward(Reward::new(
        "silver-club",
        ORG,
        ConditionTree::and(vec![leaf(Condition::level_required("silver"))]),
    ));
    let id = fx.enroll("u1").await;

    let result = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s1"))
        .await
        .unwrap();

    let mut granted = result.granted_rewards.clone();
    granted.sort();
    assert_eq!(granted, vec!["collector", "silver-club", "starter"]);
    assert_eq!(result.snapshot.total_points, 110);

    let reward_entries = fx
        .store
        .ledger_entries("u1", ORG)
        .into_iter()
        .filter(|e| e.source_type == LedgerSourceType::RewardGrant)
        .count();
    assert_eq!(reward_entries, 1);
}

#[tokio::test]
async fn test_grants_are_sticky_after_condition_change() {
    let fx = Fixture::new();
    fx.store.insert_reward(Reward::new(
        "r1",
        ORG,
        ConditionTree::and(vec![leaf(Condition::step_completed("s1"))]),
    ));
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;

    // 运营修改条件后不回收已发放的奖励
    fx.store.insert_reward(Reward::new(
        "r1",
        ORG,
        ConditionTree::and(vec![leaf(Condition::points_threshold(10_000))]),
    ));
    assert!(fx.engine.sweep_rewards("u1", ORG).await.unwrap().is_empty());

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert_eq!(evaluation.unlocked_rewards.len(), 1);
}

#[tokio::test]
async fn test_journey_self_reference_resolved_by_reward_scope() {
    let fx = Fixture::new();
    fx.store.insert_reward(
        Reward::new(
            "finisher",
            ORG,
            ConditionTree::and(vec![leaf(Condition::journey_completed(None))]),
        )
        .with_journey("j1"),
    );
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;
    fx.complete(&id, "s2").await;

    let last = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s3"))
        .await
        .unwrap();
    assert_eq!(last.granted_rewards, vec!["finisher".to_string()]);
}

#[tokio::test]
async fn test_empty_or_reward_never_granted() {
    let fx = Fixture::new();
    fx.store
        .insert_reward(Reward::new("never", ORG, ConditionTree::or(vec![])));
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;

    assert!(fx.engine.sweep_rewards("u1", ORG).await.unwrap().is_empty());
    let result = fx.engine.grant_reward("u1", ORG, "never").await.unwrap();
    assert!(!result.granted);
}

// ==================== 评估与资源门控 ====================

#[tokio::test]
async fn test_level_progress_in_evaluation() {
    let fx = Fixture::new();
    fx.engine
        .complete_milestone("u1", ORG, "imported-points", 250)
        .await
        .unwrap();

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert_eq!(evaluation.total_points, 250);
    assert_eq!(evaluation.level.current.name, "Silver");
    assert_eq!(
        evaluation.level.next.as_ref().map(|l| l.name.as_str()),
        Some("Gold")
    );
    assert_eq!(evaluation.level.points_to_next, Some(50));
}

#[tokio::test]
async fn test_resource_or_gate_returns_ordered_reasons() {
    let fx = Fixture::new();
    fx.store.insert_resource(Resource::new(
        "guide",
        ORG,
        LogicalOperator::Or,
        vec![
            Condition::points_threshold(100),
            Condition::level_required("gold"),
        ],
    ));
    fx.engine
        .complete_milestone("u1", ORG, "seed", 50)
        .await
        .unwrap();

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    let lock = &evaluation.resource_locks[0];

    assert!(!lock.unlocked);
    assert_eq!(lock.reasons.len(), 2);
    assert_eq!(lock.reasons[0].code, LockReasonCode::InsufficientPoints);
    assert_eq!(lock.reasons[1].code, LockReasonCode::LevelTooLow);
    assert!(lock.reasons[0].index < lock.reasons[1].index);
}

#[tokio::test]
async fn test_duplicate_level_threshold_still_unlocks_referencing_gate() {
    let fx = Fixture::new();
    fx.store.insert_level(Level::new("silver-b", ORG, "Silver B", 100));
    fx.store.insert_resource(Resource::new(
        "lounge",
        ORG,
        LogicalOperator::And,
        vec![Condition::level_required("silver-b")],
    ));
    fx.engine
        .complete_milestone("u1", ORG, "seed", 500)
        .await
        .unwrap();

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    let lock = &evaluation.resource_locks[0];

    assert!(lock.unlocked, "reasons: {:?}", lock.reasons);
    assert!(lock.reasons.is_empty());
    assert!(!evaluation.warnings.is_empty());
}

#[tokio::test]
async fn test_evaluate_does_not_mutate_progression() {
    let fx = Fixture::new();
    fx.store.insert_reward(Reward::new(
        "r-points",
        ORG,
        ConditionTree::and(vec![leaf(Condition::points_threshold(0))]),
    ));

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert!(evaluation.unlocked_rewards.is_empty());
    assert!(fx.store.ledger_entries("u1", ORG).is_empty());
}

#[tokio::test]
async fn test_duplicate_order_index_reported_as_warning() {
    let fx = Fixture::new();
    fx.store.insert_step(Step::new("s2b", "j1", 2, 5));
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert_eq!(evaluation.warnings.len(), 1);

    // s2 < s2b，按 ID 决定先后
    let steps = &evaluation.step_statuses[0].steps;
    assert_eq!(steps[1].step_id, "s2");
    assert_eq!(steps[1].status, StepStatus::Available);
    assert_eq!(steps[2].status, StepStatus::Locked);
}

// ==================== 资料字段与里程碑 ====================

#[tokio::test]
async fn test_profile_fields_credit_once_and_skip_empty() {
    let fx = Fixture::new();
    fx.store
        .set_profile("u1", ORG, [("bio", "hello"), ("avatar", " ")], false);

    let fields = vec!["bio".to_string(), "avatar".to_string(), "phone".to_string()];
    let first = fx
        .engine
        .complete_profile_fields("u1", ORG, &fields)
        .await
        .unwrap();

    assert_eq!(first.credited_fields, vec!["bio".to_string()]);
    assert_eq!(first.points_awarded, 5);
    assert_eq!(first.skipped_fields.len(), 2);
    assert!(first
        .skipped_fields
        .iter()
        .all(|s| s.reason == SkipReason::EmptyValue));

    let second = fx
        .engine
        .complete_profile_fields("u1", ORG, &fields)
        .await
        .unwrap();
    assert!(second.credited_fields.is_empty());
    assert!(second
        .skipped_fields
        .iter()
        .any(|s| s.field == "bio" && s.reason == SkipReason::AlreadyCredited));
    assert_eq!(second.snapshot.total_points, 5);
}

#[tokio::test]
async fn test_profile_completion_reward() {
    let fx = Fixture::new();
    fx.store.insert_reward(Reward::new(
        "complete-profile",
        ORG,
        ConditionTree::and(vec![leaf(Condition::profile_completion())]),
    ));
    fx.store.set_profile("u1", ORG, [("bio", "hello")], true);

    let result = fx
        .engine
        .complete_profile_fields("u1", ORG, &["bio".to_string()])
        .await
        .unwrap();
    assert_eq!(result.granted_rewards, vec!["complete-profile".to_string()]);
}

// ==================== 积分重算 ====================

#[tokio::test]
async fn test_recalculation_after_multiplier_change() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;
    fx.complete(&id, "s2").await;

    fx.set_multiplier(2.0);
    let report = fx.recalculation.recalculate_points(ORG).await.unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.failed, 0);

    let entries = fx.store.ledger_entries("u1", ORG);
    assert!(entries
        .iter()
        .all(|e| e.points == e.base_points * 2 && (e.multiplier - 2.0).abs() < f64::EPSILON));

    let again = fx.recalculation.recalculate_points(ORG).await.unwrap();
    assert_eq!(again.updated, 0);

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    assert_eq!(evaluation.total_points, 60);
}

#[tokio::test]
async fn test_recalculation_keeps_step_progress_in_sync() {
    let fx = Fixture::new();
    let id = fx.enroll("u1").await;
    fx.complete(&id, "s1").await;

    fx.set_multiplier(2.0);
    fx.recalculation.recalculate_points(ORG).await.unwrap();

    let retry = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s1"))
        .await
        .unwrap();
    assert!(retry.already_completed);
    assert_eq!(retry.progress.points_earned, 20);
    assert_eq!(retry.snapshot.total_points, 20);

    let evaluation = fx.engine.evaluate("u1", ORG).await.unwrap();
    let s1 = &evaluation.step_statuses[0].steps[0];
    assert_eq!(s1.step_id, "s1");
    assert_eq!(s1.points_earned, 20);
}

#[tokio::test]
async fn test_multiplier_applies_to_new_completions() {
    let fx = Fixture::new();
    fx.set_multiplier(1.5);
    let id = fx.enroll("u1").await;

    let result = fx
        .engine
        .complete_step(CompleteStepCommand::new(&id, "s1"))
        .await
        .unwrap();
    assert_eq!(result.points_awarded, 15);
}
