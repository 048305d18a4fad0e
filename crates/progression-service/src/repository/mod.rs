//! 存储层
//!
//! 提供所有实体的数据访问接口。
//!
//! ## 设计原则
//!
//! - 存储只负责持久化，不包含业务逻辑
//! - 需要原子性的复合写入（步骤完成 + 账本、奖励 + 积分）由存储在单个事务内完成
//! - 服务层通过 trait 对象依赖存储，便于替换实现和 mock 测试

mod memory;
mod postgres;
mod traits;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use postgres::{MIGRATOR, PgStore};
pub use traits::*;

/// 引擎依赖的全部存储
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub rewards: Arc<dyn UserRewardStore>,
    pub profiles: Arc<dyn UserProfileStore>,
    pub org_config: Arc<dyn OrgConfigStore>,
}

impl Stores {
    /// 用同一个后端实现全部存储
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: CatalogStore
            + ProgressStore
            + LedgerStore
            + UserRewardStore
            + UserProfileStore
            + OrgConfigStore
            + 'static,
    {
        Self {
            catalog: backend.clone(),
            progress: backend.clone(),
            ledger: backend.clone(),
            rewards: backend.clone(),
            profiles: backend.clone(),
            org_config: backend,
        }
    }
}
