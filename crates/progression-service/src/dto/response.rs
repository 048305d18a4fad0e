//! 响应 DTO 定义

use serde::Serialize;

use crate::service::RecalculationReport;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// 积分重算响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationResponse {
    pub updated: u64,
    pub message: String,
    pub failed: u64,
    pub sample_errors: Vec<String>,
    pub report: RecalculationReport,
}

impl From<RecalculationReport> for RecalculationResponse {
    fn from(report: RecalculationReport) -> Self {
        Self {
            updated: report.updated,
            message: report.message.clone(),
            failed: report.failed,
            sample_errors: report.sample_errors.clone(),
            report,
        }
    }
}
