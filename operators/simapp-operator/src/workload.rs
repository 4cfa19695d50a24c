//! 平台接口模块
//!
//! 协调器只通过这里定义的窄接口与外部交互：工作负载句柄、Pod 网络身份、
//! 状态发布以及动作结果回报。Kubernetes 实现见 `pod` 与 `status` 模块，
//! 内存实现见 `testing` 模块。

use async_trait::async_trait;
use simapp_common::{ActionError, Layer, Result, Status};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// 子进程执行请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// 命令及参数
    pub command: Vec<String>,
    /// 附加的环境变量
    pub environment: BTreeMap<String, String>,
    /// 等待子进程结束的上限
    pub timeout: Duration,
}

/// 子进程执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 工作负载句柄
///
/// 文件与进程操作都发生在受管容器内部。`exec` 只在子进程无法启动或等待超时时
/// 返回错误，非零退出码通过 `ExecOutput::exit_code` 返回。
#[async_trait]
pub trait Workload: Send + Sync {
    /// 容器是否可达
    async fn can_connect(&self) -> bool;

    /// 文件是否存在
    async fn exists(&self, path: &str) -> Result<bool>;

    /// 写入文件，必要时创建父目录
    async fn push(&self, path: &str, content: &[u8]) -> Result<()>;

    /// 在容器内执行命令并等待结束
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput>;

    /// 声明服务层，`combine` 为真时与同名层合并
    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()>;

    /// 让监管层按当前计划重新启停服务
    async fn replan(&self) -> Result<()>;
}

/// Pod 网络身份
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodAddressProvider: Send + Sync {
    /// 当前 Pod 的 IPv4 地址
    async fn pod_address(&self) -> Result<Ipv4Addr>;
}

/// 工作负载配置来源，每次处理事件时读取
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 当前的 `useDefaultConfig` 选项
    async fn use_default_config(&self) -> Result<bool>;
}

/// 状态发布
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn set_status(&self, status: &Status) -> Result<()>;
}

/// 动作结果回报
#[async_trait]
pub trait ActionReporter: Send + Sync {
    /// 记录动作 `action_id` 的结果
    async fn report(
        &self,
        action_id: &str,
        result: &std::result::Result<(), ActionError>,
    ) -> Result<()>;
}
