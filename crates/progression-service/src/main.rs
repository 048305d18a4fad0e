//! 解锁与进度服务
//!
//! 提供步骤完成、进度评估、奖励发放和积分重算的 REST API。

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::StatusCode, middleware};
use progression::{
    lock::{LockConfig, LockManager},
    repository::{MIGRATOR, MemoryStore, PgStore, Stores},
    routes,
    state::AppState,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{info, warn};
use unlock_shared::{
    config::AppConfig,
    database::Database,
    observability::{self, middleware as obs_middleware},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load("progression-service")?;
    let _guard = observability::init(&config.observability).await?;

    info!(
        environment = %config.environment,
        "Starting progression-service on {}",
        config.server_addr()
    );

    // 存储：配置数据库时使用 PostgreSQL，否则使用内存存储
    let (stores, database) = if config.database.is_configured() {
        let db = Database::connect(&config.database).await?;
        if config.database.run_migrations {
            db.run_migrations(&MIGRATOR).await?;
        }
        let store = Arc::new(PgStore::new(db.pool().clone()));
        (Stores::from_backend(store), Some(db))
    } else if config.is_production() {
        anyhow::bail!("生产环境必须配置 database.url");
    } else {
        warn!("database.url 未配置，使用内存存储，重启后数据丢失");
        (Stores::from_backend(Arc::new(MemoryStore::new())), None)
    };

    // 报名级锁：配置 Redis 时跨实例串行化
    let redis_client = match config.redis.url.as_deref() {
        Some(url) if !url.trim().is_empty() => Some(redis::Client::open(url)?),
        _ => {
            info!("Redis 未配置，报名级锁使用进程内锁");
            None
        }
    };
    let lock_config = LockConfig::from_progression(&config.progression, &config.redis.key_prefix);
    let locks = Arc::new(LockManager::new(redis_client, lock_config));

    let state = AppState::new(stores, locks, &config.progression);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app: Router = routes::app(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_seconds),
        ))
        .layer(cors)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(db) = database {
        db.close().await;
    }
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
