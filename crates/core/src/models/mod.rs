//! # 数据模型
//!
//! 编排核心共享的值类型：任务、Agent、Worker 以及Agent间消息。
//!
//! 所有模型实现 `Serialize`/`Deserialize`，任务模型同时是持久化镜像的存储格式
//! (payload 与 metadata 均为有序映射，序列化结果稳定)。

pub mod agent;
pub mod message;
pub mod task;
pub mod worker;

pub use agent::*;
pub use message::*;
pub use task::*;
pub use worker::*;
