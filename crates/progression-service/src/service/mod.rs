//! 服务层
//!
//! - `sequencer`: 步骤顺序状态机
//! - `ledger`: 积分计算与等级进度
//! - `snapshot`: 用户进度快照构建
//! - `granter`: 奖励评估、发放与扫描
//! - `engine`: 对外的解锁引擎入口
//! - `recalculation`: 管理员触发的积分重算

pub mod dto;
pub mod engine;
pub mod granter;
pub mod ledger;
pub mod recalculation;
pub mod sequencer;
pub mod snapshot;

pub use dto::*;
pub use engine::UnlockEngine;
pub use granter::{GrantOutcome, RewardGranter, SweepTrigger};
pub use ledger::{LevelProgress, PointsAward, ProgressionLedger};
pub use recalculation::RecalculationService;
pub use sequencer::{Completability, StepSequencer, StepState};
pub use snapshot::{SnapshotBuilder, UserProgress};
