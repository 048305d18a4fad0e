//! 应用状态定义

use std::sync::Arc;

use crate::lock::{LockConfig, LockManager};
use crate::repository::Stores;
use crate::service::{RecalculationService, UnlockEngine};
use unlock_shared::config::ProgressionConfig;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<UnlockEngine>,
    pub recalculation: Arc<RecalculationService>,
}

impl AppState {
    pub fn new(stores: Stores, locks: Arc<LockManager>, config: &ProgressionConfig) -> Self {
        Self {
            engine: Arc::new(UnlockEngine::new(stores.clone(), locks, config.clone())),
            recalculation: Arc::new(RecalculationService::new(stores, config)),
        }
    }

    /// 仅使用进程内锁，供测试和单实例部署使用
    pub fn local(stores: Stores, config: &ProgressionConfig) -> Self {
        let locks = Arc::new(LockManager::local(LockConfig::from_progression(
            config, "unlock",
        )));
        Self::new(stores, locks, config)
    }
}
