//! 解锁与进度服务
//!
//! 管理用户在旅程中的步骤推进、积分账本、等级计算、奖励发放和资源门控。
//!
//! ## 核心功能
//!
//! - **步骤顺序**：步骤按 order_index 依次解锁，每个步骤只能完成一次
//! - **积分账本**：所有积分以只追加的账本条目记录，幂等键防止重复入账
//! - **奖励发放**：状态变更后扫描受影响的奖励，条件满足即永久发放
//! - **资源门控**：返回每个未满足条件的结构化锁定原因
//! - **积分重算**：管理员触发的分批、可恢复的积分重算
//!
//! ## 模块结构
//!
//! - `models`: 领域模型
//! - `repository`: 存储接口及内存、PostgreSQL 实现
//! - `lock`: 报名级锁
//! - `service`: 引擎与各组件
//! - `dto` / `handlers` / `routes` / `state`: HTTP 层
//! - `error`: 错误类型定义

pub mod dto;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod models;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;

pub use error::{ProgressionError, Result};
pub use repository::{MemoryStore, PgStore, Stores};
pub use service::{RecalculationService, UnlockEngine};
pub use state::AppState;
