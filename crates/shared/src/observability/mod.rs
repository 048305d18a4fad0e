//! 可观测性
//!
//! 结构化日志、Prometheus 指标和 HTTP 中间件。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识指标来源
    pub service_name: String,

    /// 日志级别（如 "info", "debug"），`RUST_LOG` 优先
    pub log_level: String,

    /// 是否启用 JSON 格式日志
    pub json_logs: bool,

    pub metrics_enabled: bool,

    /// Prometheus 指标导出端口
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

/// 可观测性资源守卫，需持有到进程退出
pub struct ObservabilityGuard {
    metrics: Option<metrics::MetricsServer>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if self.metrics.take().is_some() {
            info!("指标导出服务已停止");
        }
    }
}

/// 初始化日志，并在启用时安装 Prometheus 导出
///
/// ```ignore
/// let config = AppConfig::load("progression-service")?;
/// let _guard = observability::init(&config.observability).await?;
/// ```
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        metrics_enabled = config.metrics_enabled,
        "可观测性初始化完成"
    );

    Ok(ObservabilityGuard { metrics })
}
