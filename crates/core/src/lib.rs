//! 任务编排核心库
//!
//! 共享的错误类型、数据模型、跨组件trait、有序路由表、配置与日志初始化。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod routing;
pub mod traits;

pub use errors::OrchestratorError;
pub use models::*;
pub use routing::{FnPredicate, KeywordPredicate, RoutePredicate, RoutingRule, RoutingTable};
pub use traits::*;

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
