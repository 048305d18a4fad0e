//! 规则库错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("条件树解析失败: {0}")]
    ParseError(String),

    #[error("条件树校验失败: {path} - {message}")]
    Validation { path: String, message: String },

    #[error("未知的条件类型: {0}")]
    UnknownConditionType(String),

    #[error("条件 {condition_type} 缺少字段 {field}")]
    MissingReference {
        condition_type: String,
        field: &'static str,
    },

    #[error("悬空引用: {kind} {id} 不存在")]
    DanglingReference { kind: &'static str, id: String },

    #[error("字段 {field} 的值无效: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("journey_completed 条件未指定 journey_id，且当前评估没有旅程上下文")]
    UnresolvedSelfReference,

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 是否属于条件本身的校验问题（写入时应拒绝，评估时按未满足处理）
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::JsonError(_))
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
