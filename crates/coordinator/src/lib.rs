//! Agent协调层
//!
//! 外部Agent的注册表、按优先级排序的收件箱、基于关联ID的请求/响应、
//! 任务分配、顺序工作流以及心跳超时检测。

pub mod coordinator;
pub mod events;
pub mod mailbox;
pub mod routing;
pub mod workflow;

pub use coordinator::{
    AgentCoordinator, CoordinationStats, MessageOptions, PendingResponse, RoutingRuleInfo,
    COORDINATOR_ID,
};
pub use events::{CoordinatorEvent, CoordinatorEventType, EventBus, EventHandler};
pub use mailbox::Mailboxes;
pub use routing::default_agent_routing;
pub use workflow::{StepOutcome, StepResult, Workflow, WorkflowStatus, WorkflowStep, WorkflowSummary};
