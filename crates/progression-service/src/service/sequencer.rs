//! 步骤顺序状态机
//!
//! 每个（报名, 步骤）只有 locked / available / completed 三种状态。
//! 状态从完成记录推导：第一个步骤初始可用，前一步完成后下一步才可用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{ProgressionError, Result};
use crate::models::{Enrollment, Step, StepProgress, StepStatus};

/// 推导出的步骤状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub step_id: String,
    pub name: String,
    pub order_index: i32,
    pub status: StepStatus,
    pub points_earned: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 完成检查结果
#[derive(Debug)]
pub enum Completability<'a> {
    Available {
        step: &'a Step,
        /// 完成该步骤后旅程全部完成
        completes_journey: bool,
    },
    /// 已完成，重复完成按幂等处理
    AlreadyCompleted(StepProgress),
}

pub struct StepSequencer;

impl StepSequencer {
    /// 按 order_index 排序，重复时按 ID 决定先后并返回告警
    pub fn order_steps(journey_id: &str, mut steps: Vec<Step>) -> (Vec<Step>, Vec<String>) {
        steps.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));

        let warnings: Vec<String> = steps
            .windows(2)
            .filter(|pair| pair[0].order_index == pair[1].order_index)
            .map(|pair| {
                warn!(
                    journey_id = %journey_id,
                    first = %pair[0].id,
                    second = %pair[1].id,
                    order_index = pair[0].order_index,
                    "步骤 order_index 重复"
                );
                format!(
                    "旅程 {} 中步骤 {} 与 {} 的 order_index 重复 ({})，按 ID 排序",
                    journey_id, pair[0].id, pair[1].id, pair[0].order_index
                )
            })
            .collect();

        (steps, warnings)
    }

    /// 推导每个步骤的当前状态
    pub fn derive_states(ordered: &[Step], progress: &[StepProgress]) -> Vec<StepState> {
        let completed: HashMap<&str, &StepProgress> = progress
            .iter()
            .filter(|p| p.is_completed())
            .map(|p| (p.step_id.as_str(), p))
            .collect();

        let mut states: Vec<StepState> = Vec::with_capacity(ordered.len());
        for step in ordered {
            let done = completed.get(step.id.as_str());
            let status = match done {
                Some(_) => StepStatus::Completed,
                None => match states.last() {
                    None => StepStatus::Available,
                    Some(prev) if prev.status == StepStatus::Completed => StepStatus::Available,
                    Some(_) => StepStatus::Locked,
                },
            };

            states.push(StepState {
                step_id: step.id.clone(),
                name: step.name.clone(),
                order_index: step.order_index,
                status,
                points_earned: done.map_or(0, |p| p.points_earned),
                completed_at: done.and_then(|p| p.completed_at),
            });
        }

        states
    }

    /// 检查步骤能否完成
    pub fn check_completion<'a>(
        enrollment: &Enrollment,
        ordered: &'a [Step],
        progress: &[StepProgress],
        step_id: &str,
    ) -> Result<Completability<'a>> {
        if enrollment.is_dropped() {
            return Err(ProgressionError::EnrollmentInactive {
                enrollment_id: enrollment.id.clone(),
                status: enrollment.status.as_str().to_string(),
            });
        }

        let Some(index) = ordered.iter().position(|s| s.id == step_id) else {
            return Err(ProgressionError::StepNotFound {
                journey_id: enrollment.journey_id.clone(),
                step_id: step_id.to_string(),
            });
        };

        if let Some(done) = progress
            .iter()
            .find(|p| p.step_id == step_id && p.is_completed())
        {
            return Ok(Completability::AlreadyCompleted(done.clone()));
        }

        let states = Self::derive_states(ordered, progress);
        let status = states[index].status;
        if status != StepStatus::Available {
            return Err(ProgressionError::StepLocked {
                step_id: step_id.to_string(),
                status: status.as_str().to_string(),
            });
        }

        let completes_journey = states
            .iter()
            .enumerate()
            .all(|(i, s)| i == index || s.status == StepStatus::Completed);

        Ok(Completability::Available {
            step: &ordered[index],
            completes_journey,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrollmentStatus;

    fn journey_steps() -> Vec<Step> {
        vec![
            Step::new("s3", "j1", 3, 10),
            Step::new("s1", "j1", 1, 10),
            Step::new("s2", "j1", 2, 10),
        ]
    }

    fn done(step_id: &str) -> StepProgress {
        StepProgress {
            enrollment_id: "e1".to_string(),
            step_id: step_id.to_string(),
            status: StepStatus::Completed,
            points_earned: 10,
            completed_at: Some(Utc::now()),
            external_reference: None,
            metadata: None,
        }
    }

    fn statuses(states: &[StepState]) -> Vec<StepStatus> {
        states.iter().map(|s| s.status).collect()
    }

    #[test]
    fn test_initial_states() {
        let (ordered, warnings) = StepSequencer::order_steps("j1", journey_steps());
        assert!(warnings.is_empty());
        assert_eq!(ordered[0].id, "s1");

        let states = StepSequencer::derive_states(&ordered, &[]);
        assert_eq!(
            statuses(&states),
            vec![StepStatus::Available, StepStatus::Locked, StepStatus::Locked]
        );
    }

    #[test]
    fn test_completion_unlocks_next_only() {
        let (ordered, _) = StepSequencer::order_steps("j1", journey_steps());
        let states = StepSequencer::derive_states(&ordered, &[done("s1")]);
        assert_eq!(
            statuses(&states),
            vec![StepStatus::Completed, StepStatus::Available, StepStatus::Locked]
        );
        assert_eq!(states[0].points_earned, 10);
    }

    #[test]
    fn test_duplicate_order_index_tie_broken_by_id() {
        let steps = vec![Step::new("b", "j1", 1, 0), Step::new("a", "j1", 1, 0)];
        let (ordered, warnings) = StepSequencer::order_steps("j1", steps);
        assert_eq!(ordered[0].id, "a");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_check_locked_step_rejected() {
        let enrollment = Enrollment::start("u1", "j1", "org-1");
        let (ordered, _) = StepSequencer::order_steps("j1", journey_steps());

        let err = StepSequencer::check_completion(&enrollment, &ordered, &[], "s2").unwrap_err();
        assert!(matches!(err, ProgressionError::StepLocked { ref step_id, .. } if step_id == "s2"));
    }

    #[test]
    fn test_check_last_step_completes_journey() {
        let enrollment = Enrollment::start("u1", "j1", "org-1");
        let (ordered, _) = StepSequencer::order_steps("j1", journey_steps());

        match StepSequencer::check_completion(&enrollment, &ordered, &[done("s1")], "s2").unwrap() {
            Completability::Available {
                step,
                completes_journey,
            } => {
                assert_eq!(step.id, "s2");
                assert!(!completes_journey);
            }
            other => panic!("unexpected {:?}", other),
        }

        let progress = [done("s1"), done("s2")];
        match StepSequencer::check_completion(&enrollment, &ordered, &progress, "s3").unwrap() {
            Completability::Available {
                completes_journey, ..
            } => assert!(completes_journey),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_check_already_completed() {
        let enrollment = Enrollment::start("u1", "j1", "org-1");
        let (ordered, _) = StepSequencer::order_steps("j1", journey_steps());
        let result =
            StepSequencer::check_completion(&enrollment, &ordered, &[done("s1")], "s1").unwrap();
        assert!(matches!(result, Completability::AlreadyCompleted(p) if p.step_id == "s1"));
    }

    #[test]
    fn test_check_unknown_step_and_dropped_enrollment() {
        let mut enrollment = Enrollment::start("u1", "j1", "org-1");
        let (ordered, _) = StepSequencer::order_steps("j1", journey_steps());

        assert!(matches!(
            StepSequencer::check_completion(&enrollment, &ordered, &[], "nope"),
            Err(ProgressionError::StepNotFound { .. })
        ));

        enrollment.status = EnrollmentStatus::Dropped;
        assert!(matches!(
            StepSequencer::check_completion(&enrollment, &ordered, &[], "s1"),
            Err(ProgressionError::EnrollmentInactive { .. })
        ));
    }
}
