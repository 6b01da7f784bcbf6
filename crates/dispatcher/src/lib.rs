//! 任务调度
//!
//! 优先级+依赖感知的就绪队列、重试退避策略、周期任务、执行登记与任务到队列的路由。

pub mod dependency_checker;
pub mod ready_queue;
pub mod recurring;
pub mod retry_service;
pub mod scheduler;
pub mod task_registry;
pub mod task_router;

#[cfg(test)]
pub mod test_utils;

pub use recurring::{job_id_of, RecurringJob, RecurringScheduler};
pub use retry_service::RetryPolicy;
pub use scheduler::{PriorityScheduler, QueueStats, RecoveryReport, RequeueOutcome};
pub use task_registry::{
    ExecutionFilter, ExecutionState, TaskExecution, TaskNameStats, TaskRegistry,
};
pub use task_router::{RouteDecision, TaskRoute, TaskRouter};
