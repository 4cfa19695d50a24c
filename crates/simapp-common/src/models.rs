//! 数据模型模块
//!
//! 该模块定义了 Operator 使用的核心数据模型：对外可见的工作负载状态，
//! 以及交给进程监管层的服务层描述。

pub mod status;
pub mod layer;
