//! SIMAPP Common - 跨模块共享的错误类型与数据模型
//!
//! 该模块提供 SIMAPP Operator 各组件共享的数据结构和错误处理机制，
//! 包括工作负载状态、Pebble 风格的服务层与计划模型。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::{ActionError, Error, IntoError, Result};
pub use models::layer::*;
pub use models::status::*;
