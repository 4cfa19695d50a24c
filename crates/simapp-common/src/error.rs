//! 错误处理模块
//!
//! 该模块提供 SIMAPP Operator 的统一错误类型。`Error` 覆盖平台交互中的故障，
//! `ActionError` 是用户触发的动作失败时返回给调用方的错误，其 `Display`
//! 即为报告给用户的消息。

use std::io;
use thiserror::Error;

/// SIMAPP 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 工作负载（容器）交互错误
    #[error("工作负载错误: {0}")]
    Workload(String),

    /// 无法获取 Pod 网络身份
    #[error("网络身份错误: {0}")]
    NetworkIdentity(String),

    /// 服务层声明错误
    #[error("服务层错误: {0}")]
    Layer(String),

    /// 子进程无法启动或等待超时
    #[error("进程执行错误: {0}")]
    Exec(String),

    /// Kubernetes API 错误
    #[error("Kubernetes 错误: {0}")]
    Kube(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// YAML 错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

/// SIMAPP 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 动作失败原因
///
/// 前两种对应动作的前置条件，消息文本是用户可见的契约，不要修改。
#[derive(Error, Debug)]
pub enum ActionError {
    /// 工作负载不可达
    #[error("Container is not ready")]
    Unreachable,

    /// 配置文件不存在
    #[error("Config file is not written")]
    MissingConfig,

    /// 一次性子进程退出码非零或执行故障
    #[error("{message}")]
    ProcessExecFault {
        /// 报告给用户的消息
        message: String,
        /// 子进程的错误输出
        stderr: String,
    },

    /// 平台交互故障
    #[error(transparent)]
    Platform(#[from] Error),
}

/// 从字符串创建错误
pub trait IntoError<T> {
    /// 将当前类型转换为错误
    fn into_error(self, kind: fn(String) -> Error) -> Result<T>;
}

impl<T> IntoError<T> for String {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self))
    }
}

impl<T> IntoError<T> for &str {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self.to_string()))
    }
}
