//! 自定义资源定义模块
//!
//! `SimApp` 承载工作负载的可调配置和对外可见状态；`SimAppAction`
//! 表示一次用户触发的动作请求，执行结果写回其状态。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{Api, Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use simapp_common::{Error, Result};

use crate::workload::ConfigSource;

/// 当前支持的动作
pub const CONFIGURE_NETWORK_ACTION: &str = "configure-network";

/// SimApp 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "simapp.io", version = "v1alpha1", kind = "SimApp", namespaced)]
#[kube(status = "SimAppStatus")]
#[kube(printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".status.message"}"#)]
#[serde(rename_all = "camelCase")]
pub struct SimAppSpec {
    /// 由 Operator 写入默认配置文件
    #[serde(default)]
    pub use_default_config: bool,
}

/// SimApp 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimAppStatus {
    /// 状态：Waiting、Blocked、Active
    pub state: String,

    /// 状态消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 上次更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// 动作请求
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(group = "simapp.io", version = "v1alpha1", kind = "SimAppAction", namespaced)]
#[kube(status = "SimAppActionStatus")]
#[kube(printcolumn = r#"{"name":"Action", "type":"string", "jsonPath":".spec.action"}"#)]
#[kube(printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#)]
#[serde(rename_all = "camelCase")]
pub struct SimAppActionSpec {
    /// 目标 SimApp 名称
    pub simapp: String,

    /// 动作名称
    #[serde(default = "default_action")]
    pub action: String,
}

/// 动作状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimAppActionStatus {
    /// 状态：Completed、Failed
    pub state: String,

    /// 失败原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 完成时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_action() -> String {
    CONFIGURE_NETWORK_ACTION.to_string()
}

impl SimAppAction {
    /// 尚未执行过的动作
    pub fn is_pending(&self) -> bool {
        self.status.is_none()
    }
}

/// 从 `SimApp` 资源读取当前配置
pub struct SimAppConfig {
    api: Api<SimApp>,
    name: String,
}

impl SimAppConfig {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ConfigSource for SimAppConfig {
    async fn use_default_config(&self) -> Result<bool> {
        let app = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| Error::Kube(format!("读取 SimApp {} 失败: {}", self.name, e)))?;
        Ok(app.spec.use_default_config)
    }
}
