//! 工作负载状态模型
//!
//! 每次协调都会重新计算一个 `Status` 并发布，状态本身不可原地修改。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 对外可见的工作负载状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message")]
pub enum Status {
    /// 等待外部条件满足（容器就绪、配置写入）
    Waiting(String),
    /// 需要人工介入
    Blocked(String),
    /// 服务已启动
    Active,
}

impl Status {
    /// 创建等待状态
    pub fn waiting(reason: impl Into<String>) -> Self {
        Status::Waiting(reason.into())
    }

    /// 创建阻塞状态
    pub fn blocked(reason: impl Into<String>) -> Self {
        Status::Blocked(reason.into())
    }

    /// 状态名称，写入自定义资源的 `status.state`
    pub fn state(&self) -> &'static str {
        match self {
            Status::Waiting(_) => "Waiting",
            Status::Blocked(_) => "Blocked",
            Status::Active => "Active",
        }
    }

    /// 状态消息，`Active` 没有消息
    pub fn message(&self) -> Option<&str> {
        match self {
            Status::Waiting(reason) | Status::Blocked(reason) => Some(reason),
            Status::Active => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {}", self.state(), message),
            None => f.write_str(self.state()),
        }
    }
}
