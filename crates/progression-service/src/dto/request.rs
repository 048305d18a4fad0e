//! 请求 DTO 定义

use serde::Deserialize;
use serde_json::Value;
use unlock_rules::ConditionTree;
use validator::Validate;

/// 报名旅程请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    #[validate(length(min = 1, max = 100, message = "用户ID长度必须在1-100个字符之间"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 100, message = "旅程ID长度必须在1-100个字符之间"))]
    pub journey_id: String,
}

/// 完成步骤请求，body 可省略
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteStepRequest {
    #[validate(length(max = 255, message = "外部引用长度不能超过255个字符"))]
    pub external_reference: Option<String>,
    pub metadata: Option<Value>,
}

/// 资料字段完成请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteProfileFieldsRequest {
    #[validate(length(min = 1, message = "组织ID不能为空"))]
    pub org_id: String,
    #[validate(length(min = 1, max = 100, message = "字段数量必须在1-100之间"))]
    pub fields: Vec<String>,
}

/// 里程碑完成请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMilestoneRequest {
    #[validate(length(min = 1, message = "组织ID不能为空"))]
    pub org_id: String,
    #[validate(length(min = 1, max = 200, message = "里程碑key长度必须在1-200个字符之间"))]
    pub milestone_key: String,
    #[validate(range(min = 0, message = "里程碑积分不能为负数"))]
    pub points: i64,
}

/// 按组织查询/操作
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrgQuery {
    #[validate(length(min = 1, message = "组织ID不能为空"))]
    pub org_id: String,
}

/// 条件树预览请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRewardRequest {
    #[validate(length(min = 1, message = "组织ID不能为空"))]
    pub org_id: String,
    pub unlock_condition: ConditionTree,
    /// 条件树所属旅程，用于解析未指定 journey_id 的 journey_completed
    pub journey_id: Option<String>,
    /// 指定后返回该用户的评估追踪
    pub user_id: Option<String>,
}

/// 手动发放请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ManualGrantRequest {
    #[validate(length(min = 1, message = "组织ID不能为空"))]
    pub org_id: String,
}
