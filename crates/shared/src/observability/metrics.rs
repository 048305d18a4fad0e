//! Prometheus 指标
//!
//! 进度引擎的业务指标与 HTTP 指标。导出器在独立端口提供 `/metrics`，
//! 未安装 recorder 时各记录函数为空操作。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 指标名称
pub mod names {
    pub const HTTP_REQUESTS: &str = "http_requests_total";
    pub const HTTP_DURATION: &str = "http_request_duration_seconds";
    pub const STEP_COMPLETIONS: &str = "step_completions_total";
    pub const REWARD_GRANTS: &str = "reward_grants_total";
    pub const EVALUATIONS: &str = "evaluations_total";
    pub const EVALUATION_DURATION: &str = "evaluation_duration_seconds";
    pub const RECALCULATION_ROWS: &str = "recalculation_rows_total";
}

/// 指标导出服务，Drop 时停止
pub struct MetricsServer {
    task: JoinHandle<()>,
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 安装全局 recorder 并启动导出服务
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsServer> {
    let handle = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .install_recorder()?;
    describe_all();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标导出服务已启动");

    Ok(MetricsServer {
        task: tokio::spawn(serve(listener, handle)),
    })
}

async fn serve(listener: TcpListener, handle: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "指标导出服务异常退出");
    }
}

fn describe_all() {
    describe_counter!(names::HTTP_REQUESTS, "HTTP requests by method, route and status");
    describe_histogram!(names::HTTP_DURATION, "HTTP request latency in seconds");
    describe_counter!(names::STEP_COMPLETIONS, "Step completion attempts by outcome");
    describe_counter!(names::REWARD_GRANTS, "Rewards granted by source");
    describe_counter!(names::EVALUATIONS, "User progression evaluations");
    describe_histogram!(names::EVALUATION_DURATION, "Evaluation latency in seconds");
    describe_counter!(names::RECALCULATION_ROWS, "Ledger rows visited by recalculation");
}

/// 记录 HTTP 请求，`path` 使用路由模板以控制基数
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!(names::HTTP_REQUESTS, &labels).increment(1);
    histogram!(names::HTTP_DURATION, &labels).record(duration_secs);
}

/// `outcome`: completed / already_completed / locked / failed
pub fn record_step_completion(outcome: &str) {
    counter!(names::STEP_COMPLETIONS, "outcome" => outcome.to_string()).increment(1);
}

/// `source`: sweep / manual
pub fn record_reward_grant(source: &str) {
    counter!(names::REWARD_GRANTS, "source" => source.to_string()).increment(1);
}

pub fn record_evaluation(duration_secs: f64) {
    counter!(names::EVALUATIONS).increment(1);
    histogram!(names::EVALUATION_DURATION).record(duration_secs);
}

/// `status`: updated / unchanged / failed
pub fn record_recalculation_rows(status: &str, rows: u64) {
    if rows > 0 {
        counter!(names::RECALCULATION_ROWS, "status" => status.to_string()).increment(rows);
    }
}
