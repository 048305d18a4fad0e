//! 进度服务领域模型

pub mod catalog;
pub mod enums;
pub mod ledger;
pub mod level;
pub mod progress;

pub use catalog::{Journey, OrgSettings, Resource, Reward, Step};
pub use enums::{EnrollmentStatus, GrantSource, LedgerSourceType, StepStatus};
pub use ledger::{LedgerEntry, LedgerUpdate, NewLedgerEntry, idempotency};
pub use level::{FLOOR_LEVEL_ID, Level, LevelTable};
pub use progress::{Enrollment, StepProgress, UserReward};
