//! 报名级锁
//!
//! 同一报名的步骤完成必须串行执行。
//!
//! ```ignore
//! let guard = lock_manager.acquire("enrollment:e1", None).await?;
//! complete_step_in_lock().await?;
//! guard.release().await?;
//! ```

mod lock_manager;

pub use lock_manager::{LockConfig, LockGuard, LockManager};
