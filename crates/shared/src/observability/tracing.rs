//! 日志初始化
//!
//! 开发环境输出可读格式；`json_logs` 打开时输出单行 JSON，带当前 span 字段，
//! 便于按 enrollment_id / user_id 检索。

use anyhow::Result;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::ObservabilityConfig;

/// `RUST_LOG` 优先；配置值无法解析时退回 info
pub fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局 subscriber，只能调用一次
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let output = if config.json_logs {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        fmt::layer().with_target(false).compact().boxed()
    };

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(output)
        .try_init()?;

    Ok(())
}
