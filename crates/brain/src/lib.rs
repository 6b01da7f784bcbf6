//! 主控大脑
//!
//! 指标分析、反馈循环、系统优化器与决策执行，以及面向外部网关的控制面命令。

pub mod analytics;
pub mod control_plane;
pub mod decision;
pub mod feedback_loop;
pub mod insights;
pub mod master_brain;
pub mod message;
pub mod optimizer;
mod params;

pub use analytics::{labels, Aggregation, AnalyticsCollector, MetricKind, MetricPoint};
pub use control_plane::{CommandRecord, CommandRequest, CommandStatus, CommandType, ControlPlane};
pub use decision::{Decision, DecisionStatus, DecisionType};
pub use feedback_loop::{
    FeedbackAction, FeedbackEntry, FeedbackLoop, FeedbackRule, FeedbackSummary, PatternSummary,
    Trend,
};
pub use insights::{AgentPerformance, CompletionTrend, ErrorPattern, Insights};
pub use master_brain::{
    BrainState, MasterBrain, OptimizationCycleReport, SystemStatus, TaskStatusView,
    TrackedTaskStatus,
};
pub use message::{AgentMessage, AgentMessageKind, MessageHandler, ObservedAgent};
pub use optimizer::{
    Bottleneck, OptimizationChange, OptimizationConstraints, OptimizationReport,
    OptimizationResult, OptimizationStrategy, PendingTaskInfo, StrategyWeights, SystemOptimizer,
    SystemState,
};
