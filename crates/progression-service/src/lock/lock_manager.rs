//! 报名级锁管理器
//!
//! 配置 Redis 时使用 Redis 锁跨实例串行化，否则使用进程内的按键互斥锁。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use redis::Client as RedisClient;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use unlock_shared::config::ProgressionConfig;
use uuid::Uuid;

use crate::error::{ProgressionError, Result};

type LocalLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 默认锁超时时间
    pub default_ttl: Duration,
    /// 获取锁重试次数
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
    /// Redis key 前缀
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_millis(50),
            key_prefix: "unlock".to_string(),
        }
    }
}

impl LockConfig {
    pub fn from_progression(config: &ProgressionConfig, key_prefix: &str) -> Self {
        Self {
            default_ttl: Duration::from_millis(config.lock_ttl_ms),
            retry_count: config.lock_retry_times.max(1),
            retry_delay: Duration::from_millis(config.lock_retry_delay_ms),
            key_prefix: key_prefix.to_string(),
        }
    }
}

/// 锁管理器
///
/// Redis 操作失败时降级到进程内锁，保证单实例内的串行化。
pub struct LockManager {
    redis_client: Option<RedisClient>,
    local: LocalLocks,
    config: LockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl LockManager {
    pub fn new(redis_client: Option<RedisClient>, config: LockConfig) -> Self {
        Self {
            redis_client,
            local: Arc::new(DashMap::new()),
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 仅使用进程内锁
    pub fn local(config: LockConfig) -> Self {
        Self::new(None, config)
    }

    /// 获取锁
    ///
    /// 在重试次数（Redis）或超时时间（进程内）内无法获取时返回 `LockConflict`。
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn acquire(&self, key: &str, ttl: Option<Duration>) -> Result<LockGuard> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        // owner 格式: instance_id:uuid
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());

        if let Some(ref client) = self.redis_client {
            match self.acquire_redis(client, key, &owner, ttl).await {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => {
                    return Err(ProgressionError::LockConflict {
                        resource: key.to_string(),
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis lock failed, falling back to local lock");
                }
            }
        }

        self.acquire_local(key, owner, ttl).await
    }

    async fn acquire_redis(
        &self,
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<Option<LockGuard>, String> {
        for attempt in 0..self.config.retry_count {
            if self.try_redis_lock(client, key, owner, ttl).await? {
                debug!(key = %key, owner = %owner, attempt, "Redis lock acquired");
                return Ok(Some(LockGuard {
                    key: key.to_string(),
                    owner: owner.to_string(),
                    backend: LockBackend::Redis {
                        client: client.clone(),
                        lock_key: self.redis_key(key),
                    },
                    released: false,
                }));
            }

            if attempt + 1 < self.config.retry_count {
                debug!(key = %key, attempt, "Lock not acquired, retrying");
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Ok(None)
    }

    /// SET NX PX 原子获取
    async fn try_redis_lock(
        &self,
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, String> {
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| e.to_string())?;

        let result: Option<String> = redis::cmd("SET")
            .arg(self.redis_key(key))
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(result.is_some())
    }

    async fn acquire_local(&self, key: &str, owner: String, ttl: Duration) -> Result<LockGuard> {
        let mutex = self
            .local
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(ttl, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(key = %key, owner = %owner, "Local lock acquired");
                Ok(LockGuard {
                    key: key.to_string(),
                    owner,
                    backend: LockBackend::Local {
                        guard: Some(guard),
                        table: self.local.clone(),
                    },
                    released: false,
                })
            }
            Err(_) => Err(ProgressionError::LockConflict {
                resource: key.to_string(),
            }),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.config.key_prefix, key)
    }
}

/// 锁守卫
///
/// 建议使用 `release()` 显式释放。Redis 锁在 Drop 时无法异步释放，只能等待 TTL 过期。
pub struct LockGuard {
    key: String,
    owner: String,
    backend: LockBackend,
    released: bool,
}

enum LockBackend {
    Redis {
        client: RedisClient,
        lock_key: String,
    },
    Local {
        guard: Option<OwnedMutexGuard<()>>,
        table: LocalLocks,
    },
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match &mut self.backend {
            LockBackend::Redis { client, lock_key } => {
                Self::release_redis(client, lock_key, &self.owner).await
            }
            LockBackend::Local { guard, table } => {
                Self::release_local(&self.key, guard, table);
                Ok(())
            }
        }
    }

    /// Lua 脚本原子验证 owner 并删除
    async fn release_redis(client: &RedisClient, lock_key: &str, owner: &str) -> Result<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;

        let script = r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
        "#;

        let result: i32 = redis::Script::new(script)
            .key(lock_key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;

        if result == 0 {
            warn!(lock_key = %lock_key, owner = %owner, "Lock was already released or owned by another client");
        } else {
            debug!(lock_key = %lock_key, "Redis lock released");
        }

        Ok(())
    }

    fn release_local(key: &str, guard: &mut Option<OwnedMutexGuard<()>>, table: &LocalLocks) {
        if guard.take().is_some() {
            // 没有等待者时回收条目
            table.remove_if(key, |_, m| Arc::strong_count(m) == 1);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &mut self.backend {
            LockBackend::Local { guard, table } => Self::release_local(&self.key, guard, table),
            LockBackend::Redis { .. } if !self.released => {
                warn!(
                    lock_key = %self.key,
                    owner = %self.owner,
                    "LockGuard dropped without explicit release - lock will expire via TTL"
                );
            }
            LockBackend::Redis { .. } => {}
        }
    }
}
