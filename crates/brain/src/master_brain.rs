//! 主控大脑
//!
//! 汇总Agent上报的消息，周期性地分析系统状态并生成决策。
//! 置信度达到阈值的决策自动执行，其余进入人工审核队列。
//!
//! ```text
//! Agent消息 ──→ 洞察统计 ──→ 优化周期 ──→ 决策 ─┬─→ 自动执行 (≥ 阈值)
//!      └─────→ 反馈循环 ──→ 反馈周期 ──┘       └─→ 审核队列
//! ```
//!
//! 决策按类型分派：任务分配交给协调器，优先级调整交给调度器，
//! 资源分配交给Worker池管理器。单个决策失败只记录在决策本身上。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use orchestrator_coordinator::{AgentCoordinator, CoordinationStats};
use orchestrator_core::{
    config::BrainConfig, AgentState, AgentType, OrchestratorError, OrchestratorResult, Task,
    TaskPriority, TaskState, TaskSubmission,
};
use orchestrator_dispatcher::{
    job_id_of, PriorityScheduler, QueueStats, RecurringScheduler, RequeueOutcome, TaskRegistry,
    TaskRouter,
};
use orchestrator_infrastructure::MetricsCollector;
use orchestrator_worker::WorkerPoolManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::analytics::{labels, AnalyticsCollector};
use crate::decision::{Decision, DecisionType};
use crate::feedback_loop::{FeedbackAction, FeedbackLoop, PATTERN_DETECTED};
use crate::insights::{CompletionTrend, Insights};
use crate::message::{AgentMessage, AgentMessageKind, MessageHandler, ObservedAgent};
use crate::optimizer::{
    Bottleneck, OptimizationChange, OptimizationConstraints, OptimizationReport,
    OptimizationStrategy, PendingTaskInfo, SystemOptimizer, SystemState,
};
use crate::params::{
    bump_priority, optional_i64, optional_str, optional_u64, parse_time, priority_param,
    required_str,
};

/// 控制面通知使用的发送方
pub const CONTROL_PLANE_ID: &str = "control_plane";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrainState {
    Initializing,
    Active,
    Optimizing,
    Paused,
    Error,
    Shutdown,
}

impl BrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrainState::Initializing => "initializing",
            BrainState::Active => "active",
            BrainState::Optimizing => "optimizing",
            BrainState::Paused => "paused",
            BrainState::Error => "error",
            BrainState::Shutdown => "shutdown",
        }
    }

    /// 暂停、关闭或正在优化时跳过周期
    fn accepts_cycles(&self) -> bool {
        matches!(self, BrainState::Initializing | BrainState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedTaskStatus {
    Queued,
    Assigned,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
struct TrackedTask {
    task_type: String,
    /// 调度器中的任务名 `agents.<agent_type>.<task_type>`
    task_name: String,
    target_agent_type: Option<AgentType>,
    task_data: Value,
    decision_id: String,
    status: TrackedTaskStatus,
    agent_id: Option<String>,
    /// Agent领取时从调度器取出，失败后据此重新入队
    claimed: Option<Task>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// 经主控大脑提交的任务状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub task_type: String,
    pub status: TrackedTaskStatus,
    pub target_agent_type: Option<AgentType>,
    pub agent_id: Option<String>,
    pub decision_id: String,
    pub scheduler_state: Option<TaskState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 一次优化周期的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationCycleReport {
    pub strategy: OptimizationStrategy,
    pub decisions: Vec<Decision>,
    pub executed: usize,
    pub queued_for_review: usize,
    pub bottlenecks: Vec<Bottleneck>,
    /// 与上一周期相比的改进百分比，首个周期为 None
    pub improvement: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub brain_id: String,
    pub state: BrainState,
    pub uptime_seconds: i64,
    pub strategy: OptimizationStrategy,
    pub total_tasks_processed: u64,
    pub messages_received: u64,
    pub decisions_executed: u64,
    pub decisions_failed: u64,
    pub optimization_cycles: u64,
    pub observed_agents: usize,
    pub pending_decisions: usize,
    pub tracked_tasks: usize,
    pub queue: QueueStats,
    pub total_workers: usize,
    pub active_workers: usize,
    pub busy_workers: usize,
    pub coordination: CoordinationStats,
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: u64,
    decisions_executed: u64,
    decisions_failed: u64,
    optimization_cycles: u64,
}

#[derive(Debug, Default)]
struct DecisionLog {
    pending: Vec<Decision>,
    history: VecDeque<Decision>,
}

/// 周期之间保留的状态，用于计算吞吐与改进
#[derive(Debug, Default)]
struct CycleMemory {
    last_state: Option<SystemState>,
    last_changes: Vec<OptimizationChange>,
    last_counts: Option<(DateTime<Utc>, BTreeMap<String, u64>, u64)>,
}

pub struct MasterBrain {
    brain_id: String,
    config: BrainConfig,
    started_at: DateTime<Utc>,
    state: RwLock<BrainState>,
    scheduler: Arc<PriorityScheduler>,
    pool_manager: Arc<WorkerPoolManager>,
    coordinator: Arc<AgentCoordinator>,
    analytics: Arc<AnalyticsCollector>,
    feedback: FeedbackLoop,
    optimizer: Mutex<SystemOptimizer>,
    constraints: RwLock<OptimizationConstraints>,
    router: TaskRouter,
    recurring: RecurringScheduler,
    registry: TaskRegistry,
    agents: RwLock<BTreeMap<String, ObservedAgent>>,
    handlers: RwLock<HashMap<AgentMessageKind, Vec<Arc<dyn MessageHandler>>>>,
    insights: Mutex<Insights>,
    decisions: Mutex<DecisionLog>,
    tasks: Mutex<HashMap<String, TrackedTask>>,
    memory: Mutex<CycleMemory>,
    counters: Mutex<Counters>,
    metrics: MetricsCollector,
}

impl MasterBrain {
    pub fn new(
        scheduler: Arc<PriorityScheduler>,
        pool_manager: Arc<WorkerPoolManager>,
        coordinator: Arc<AgentCoordinator>,
        config: Option<BrainConfig>,
    ) -> Self {
        let config = config.unwrap_or_default();
        let strategy = config
            .optimization_strategy
            .parse::<OptimizationStrategy>()
            .unwrap_or_else(|e| {
                warn!("{}，使用 load_balance", e);
                OptimizationStrategy::LoadBalance
            });
        let analytics = Arc::new(AnalyticsCollector::from_config(&config));
        let recurring = RecurringScheduler::new(Arc::clone(&scheduler));

        Self {
            brain_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            state: RwLock::new(BrainState::Initializing),
            scheduler,
            pool_manager,
            coordinator,
            feedback: FeedbackLoop::new(Arc::clone(&analytics)),
            analytics,
            optimizer: Mutex::new(SystemOptimizer::new(strategy)),
            constraints: RwLock::new(OptimizationConstraints::default()),
            router: TaskRouter::new(),
            recurring,
            registry: TaskRegistry::new(),
            agents: RwLock::new(BTreeMap::new()),
            handlers: RwLock::new(HashMap::new()),
            insights: Mutex::new(Insights::default()),
            decisions: Mutex::new(DecisionLog::default()),
            tasks: Mutex::new(HashMap::new()),
            memory: Mutex::new(CycleMemory::default()),
            counters: Mutex::new(Counters::default()),
            metrics: MetricsCollector::new(),
            config,
        }
    }

    pub fn brain_id(&self) -> &str {
        &self.brain_id
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    pub fn pool_manager(&self) -> &Arc<WorkerPoolManager> {
        &self.pool_manager
    }

    pub fn coordinator(&self) -> &Arc<AgentCoordinator> {
        &self.coordinator
    }

    pub fn analytics(&self) -> &Arc<AnalyticsCollector> {
        &self.analytics
    }

    pub fn feedback(&self) -> &FeedbackLoop {
        &self.feedback
    }

    pub fn recurring(&self) -> &RecurringScheduler {
        &self.recurring
    }

    pub fn task_registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub async fn state(&self) -> BrainState {
        *self.state.read().await
    }

    // ========== 消息 ==========

    pub async fn register_handler(&self, message_type: AgentMessageKind, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .await
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    /// 接收Agent消息
    ///
    /// 依次更新Agent记录、调用处理器、积累洞察并转化为反馈。处理器失败只记录日志。
    pub async fn receive_message(&self, message: AgentMessage) {
        if self.state().await == BrainState::Shutdown {
            warn!("主控大脑已关闭，丢弃来自 {} 的消息", message.agent_id);
            return;
        }
        self.counters.lock().await.messages_received += 1;

        {
            let mut agents = self.agents.write().await;
            let agent = agents
                .entry(message.agent_id.clone())
                .or_insert_with(|| ObservedAgent {
                    agent_type: message.agent_type.clone(),
                    first_seen: message.timestamp,
                    last_seen: message.timestamp,
                    message_count: 0,
                    last_message_type: message.message_type,
                });
            agent.last_seen = message.timestamp;
            agent.message_count += 1;
            agent.last_message_type = message.message_type;
        }

        let handlers = self
            .handlers
            .read()
            .await
            .get(&message.message_type)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler.handle(&message) {
                error!("消息处理器执行失败: {}: {}", message.message_type, e);
            }
        }

        self.insights.lock().await.observe(&message);
        self.record_analytics(&message).await;

        if let Some((feedback_type, impact)) = feedback_signal(&message) {
            self.feedback
                .submit_feedback(&message.agent_type, &feedback_type, message.content.clone(), impact)
                .await;
        }

        if matches!(message.message_type, AgentMessageKind::Result | AgentMessageKind::Error) {
            self.settle_task_result(&message).await;
        }
    }

    async fn record_analytics(&self, message: &AgentMessage) {
        self.analytics
            .increment_counter(
                "agent_messages",
                1.0,
                labels([
                    ("agent_type", message.agent_type.as_str()),
                    ("message_type", message.message_type.as_str()),
                ]),
            )
            .await;
        if message.message_type == AgentMessageKind::Result {
            if let Some(duration) = message.content_f64("duration") {
                self.analytics
                    .observe_histogram(
                        "task_completion_seconds",
                        duration,
                        labels([("agent_type", message.agent_type.as_str())]),
                    )
                    .await;
            }
        }
    }

    /// 控制面事件以高优先级通知消息的形式进入
    pub async fn receive_notification(&self, event_type: &str, data: Value) {
        let message = AgentMessage::new(
            CONTROL_PLANE_ID,
            CONTROL_PLANE_ID,
            AgentMessageKind::Notification,
            json!({"event_type": event_type, "data": data}),
        )
        .with_priority(3);
        self.receive_message(message).await;
    }

    // ========== 决策 ==========

    /// 创建决策并放入待执行队列
    pub async fn make_decision(
        &self,
        decision_type: DecisionType,
        target_agents: Vec<String>,
        parameters: Value,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Decision {
        let decision = Decision::new(decision_type, target_agents, parameters, reasoning, confidence);
        debug!(
            "新决策: {} ({}, 置信度 {:.2}) {}",
            decision.decision_id, decision.decision_type, decision.confidence, decision.reasoning
        );
        self.decisions.lock().await.pending.push(decision.clone());
        decision
    }

    async fn take_pending(&self, decision_id: &str) -> OrchestratorResult<Decision> {
        let mut log = self.decisions.lock().await;
        if let Some(index) = log.pending.iter().position(|d| d.decision_id == decision_id) {
            return Ok(log.pending.remove(index));
        }
        if log.history.iter().any(|d| d.decision_id == decision_id) {
            return Err(OrchestratorError::InvalidCommand(format!(
                "决策已处理: {decision_id}"
            )));
        }
        Err(OrchestratorError::DecisionNotFound {
            id: decision_id.to_string(),
        })
    }

    async fn archive(&self, decision: Decision) {
        let mut log = self.decisions.lock().await;
        log.history.push_back(decision);
        while log.history.len() > self.config.decision_history_limit {
            log.history.pop_front();
        }
    }

    /// 执行待处理的决策
    ///
    /// 执行失败不会返回错误，而是记录在决策的 `status`/`error` 上；
    /// 只有决策不存在或已处理时返回错误。
    pub async fn execute_decision(&self, decision_id: &str) -> OrchestratorResult<Decision> {
        let mut decision = self.take_pending(decision_id).await?;

        match self.apply_decision(&decision).await {
            Ok(result) => {
                info!(
                    "决策已执行: {} ({}) {}",
                    decision.decision_id, decision.decision_type, decision.reasoning
                );
                decision.mark_executed(result);
                self.metrics.record_decision(true);
                self.counters.lock().await.decisions_executed += 1;
            }
            Err(e) => {
                warn!(
                    "决策执行失败: {} ({}): {}",
                    decision.decision_id, decision.decision_type, e
                );
                decision.mark_failed(e.to_string());
                self.metrics.record_decision(false);
                self.counters.lock().await.decisions_failed += 1;
            }
        }

        self.archive(decision.clone()).await;
        Ok(decision)
    }

    /// 人工批准审核队列中的决策
    pub async fn approve_decision(&self, decision_id: &str) -> OrchestratorResult<Decision> {
        info!("决策已批准: {}", decision_id);
        self.execute_decision(decision_id).await
    }

    pub async fn reject_decision(&self, decision_id: &str, reason: Option<String>) -> OrchestratorResult<Decision> {
        let mut decision = self.take_pending(decision_id).await?;
        info!("决策已驳回: {} {:?}", decision_id, reason);
        decision.mark_rejected(reason);
        self.archive(decision.clone()).await;
        Ok(decision)
    }

    pub async fn pending_decisions(&self) -> Vec<Decision> {
        self.decisions.lock().await.pending.clone()
    }

    pub async fn get_decision(&self, decision_id: &str) -> Option<Decision> {
        let log = self.decisions.lock().await;
        log.pending
            .iter()
            .chain(log.history.iter())
            .find(|d| d.decision_id == decision_id)
            .cloned()
    }

    /// 已处理的决策，最近的 `limit` 条，按处理顺序
    pub async fn get_decision_history(&self, limit: usize, decision_type: Option<DecisionType>) -> Vec<Decision> {
        let log = self.decisions.lock().await;
        let matching: Vec<&Decision> = log
            .history
            .iter()
            .filter(|d| decision_type.map_or(true, |t| d.decision_type == t))
            .collect();
        matching
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// 达到置信度阈值的决策立即执行，其余留在审核队列
    async fn settle(&self, decisions: Vec<Decision>) -> Vec<Decision> {
        let mut settled = Vec::with_capacity(decisions.len());
        for decision in decisions {
            if decision.confidence >= self.config.auto_execute_confidence {
                match self.execute_decision(&decision.decision_id).await {
                    Ok(done) => settled.push(done),
                    Err(e) => {
                        warn!("自动执行决策失败: {}: {}", decision.decision_id, e);
                        settled.push(decision);
                    }
                }
            } else {
                debug!(
                    "决策等待审核: {} (置信度 {:.2})",
                    decision.decision_id, decision.confidence
                );
                settled.push(decision);
            }
        }
        settled
    }

    async fn apply_decision(&self, decision: &Decision) -> OrchestratorResult<Value> {
        let params = &decision.parameters;
        match decision.decision_type {
            DecisionType::TaskAssignment => self.assign_tracked_task(params).await,
            DecisionType::PriorityChange => {
                let task_id = required_str(params, "task_id")?;
                let new_priority = match priority_param(params, "new_priority")? {
                    Some(priority) => priority,
                    None => {
                        let task = self.scheduler.get_task(task_id).await.ok_or_else(|| {
                            OrchestratorError::TaskNotFound {
                                id: task_id.to_string(),
                            }
                        })?;
                        let steps = optional_u64(params, "priority_boost")?.unwrap_or(1) as usize;
                        bump_priority(task.priority, steps)
                    }
                };
                self.scheduler.update_priority(task_id, new_priority).await?;
                Ok(json!({"task_id": task_id, "priority": new_priority}))
            }
            DecisionType::ResourceAllocation => {
                let queue = decision.target_queue().ok_or_else(|| {
                    OrchestratorError::InvalidCommand("资源分配决策缺少目标队列".to_string())
                })?;
                let target = optional_u64(params, "target_workers")?.map(|t| t as usize);
                let delta = optional_i64(params, "increase_workers")?;
                if target.is_none() && delta.is_none() {
                    return Err(OrchestratorError::InvalidCommand(
                        "缺少参数: target_workers 或 increase_workers".to_string(),
                    ));
                }
                let max_utilization = params.get("max_utilization").and_then(Value::as_f64);
                self.scale_queue(&queue, target, delta.unwrap_or(0), max_utilization)
                    .await
            }
            DecisionType::Optimization => self.apply_optimization(decision).await,
        }
    }

    async fn apply_optimization(&self, decision: &Decision) -> OrchestratorResult<Value> {
        let params = &decision.parameters;
        match optional_str(params, "optimization_type").unwrap_or_default() {
            "reduce_load" => {
                let queue = decision.target_queue().ok_or_else(|| {
                    OrchestratorError::InvalidCommand("降载决策缺少目标队列".to_string())
                })?;
                self.scale_queue(&queue, None, -1, None).await
            }
            "rebalance_queues" => {
                let state = self.build_system_state().await;
                let constraints = self.constraints.read().await.clone();
                let changes = SystemOptimizer::new(OptimizationStrategy::LoadBalance)
                    .optimize(&state, &constraints);
                let mut applied = 0;
                for change in &changes {
                    if let OptimizationChange::ScaleWorkers {
                        queue,
                        target_workers,
                        ..
                    } = change
                    {
                        match self.scale_queue(queue, Some(*target_workers), 0, None).await {
                            Ok(_) => applied += 1,
                            Err(e) => warn!("重新均衡队列 {} 失败: {}", queue, e),
                        }
                    }
                }
                Ok(json!({"changes": changes.len(), "applied": applied}))
            }
            "set_strategy" => {
                let strategy: OptimizationStrategy = required_str(params, "strategy")?.parse()?;
                self.set_strategy(strategy).await;
                Ok(json!({"strategy": strategy}))
            }
            "investigate" => {
                warn!(
                    "需要人工排查: {:?} {}",
                    decision.target_agents, decision.reasoning
                );
                Ok(json!({"acknowledged": true}))
            }
            other => Err(OrchestratorError::InvalidCommand(format!(
                "未知的优化类型: {other}"
            ))),
        }
    }

    /// 调整队列的Worker数，`target` 优先于 `delta`；
    /// 设置了 `max_utilization` 且当前利用率更高时跳过
    async fn scale_queue(
        &self,
        queue: &str,
        target: Option<usize>,
        delta: i64,
        max_utilization: Option<f64>,
    ) -> OrchestratorResult<Value> {
        let stats = self.pool_manager.get_worker_stats(Some(queue)).await;
        let pool = stats
            .pools
            .get(queue)
            .ok_or_else(|| OrchestratorError::PoolNotFound {
                queue: queue.to_string(),
            })?;

        if let Some(limit) = max_utilization {
            if pool.utilization > limit {
                debug!("队列 {} 利用率 {:.2} 高于 {:.2}，跳过缩容", queue, pool.utilization, limit);
                return Ok(json!({
                    "queue": queue,
                    "skipped": true,
                    "utilization": pool.utilization,
                }));
            }
        }

        let current = pool.active_workers;
        let target = target.unwrap_or_else(|| (current as i64 + delta).max(0) as usize);
        let started = self.pool_manager.scale_pool(queue, target).await?;
        let after = self.pool_manager.get_worker_stats(Some(queue)).await.active_workers;
        Ok(json!({
            "queue": queue,
            "previous_workers": current,
            "requested_workers": target,
            "active_workers": after,
            "started": started.len(),
        }))
    }

    // ========== 任务 ==========

    /// 提交任务
    ///
    /// 任务先进入调度器，再生成一个任务分配决策：显式指定或路由命中Agent类型时
    /// 置信度为0.9，否则为0.7。
    pub async fn submit_task(&self, task_data: Value) -> OrchestratorResult<String> {
        let (task_type, target) = self.resolve_target(&task_data).await?;

        let mut submission = TaskSubmission::new(task_name(target, &task_type), task_data.clone());
        submission.priority = priority_param(&task_data, "priority")?.unwrap_or_default();
        submission.deadline = parse_time(&task_data, "deadline")?;
        submission.scheduled_at = parse_time(&task_data, "scheduled_at")?;
        if let Some(deps) = task_data.get("dependencies").and_then(Value::as_array) {
            submission.dependencies = deps
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(estimate) = task_data.get("estimated_duration") {
            submission
                .metadata
                .insert("estimated_duration".to_string(), estimate.clone());
        }
        submission
            .metadata
            .insert("task_type".to_string(), json!(task_type));

        let task_id = self.scheduler.submit(submission).await?;
        self.plan_assignment(&task_id, task_type, target, task_data).await;
        Ok(task_id)
    }

    /// 按固定间隔重复执行的任务，返回 job id
    ///
    /// 每次执行都作为普通任务经过分配决策；一次执行成功或进入死信后安排下一次。
    pub async fn schedule_recurring(
        &self,
        task_data: Value,
        interval: chrono::Duration,
        start_at: Option<DateTime<Utc>>,
    ) -> OrchestratorResult<String> {
        let (task_type, target) = self.resolve_target(&task_data).await?;
        let priority = priority_param(&task_data, "priority")?.unwrap_or_default();
        let job_id = self
            .recurring
            .schedule_recurring(
                &task_name(target, &task_type),
                task_data.clone(),
                interval,
                priority,
                start_at,
            )
            .await?;

        if let Some(task_id) = self.recurring.get_job(&job_id).await.and_then(|j| j.last_task_id) {
            self.plan_assignment(&task_id, task_type, target, task_data).await;
        }
        Ok(job_id)
    }

    /// 取消周期任务；下一次执行尚未分配时一并取消
    pub async fn cancel_recurring(&self, job_id: &str) -> bool {
        let next_run = self.recurring.get_job(job_id).await.and_then(|j| j.last_task_id);
        if !self.recurring.cancel_recurring(job_id).await {
            return false;
        }
        if let Some(task_id) = next_run {
            let mut tasks = self.tasks.lock().await;
            if let Some(tracked) = tasks.get_mut(&task_id) {
                if tracked.status == TrackedTaskStatus::Queued {
                    tracked.status = TrackedTaskStatus::Cancelled;
                    tracked.updated_at = Utc::now();
                }
            }
        }
        true
    }

    /// 任务类型与目标Agent类型：显式的 `target_agent` 优先，否则按路由表匹配
    async fn resolve_target(&self, task_data: &Value) -> OrchestratorResult<(String, Option<AgentType>)> {
        if !task_data.is_object() {
            return Err(OrchestratorError::InvalidCommand(
                "任务数据必须是JSON对象".to_string(),
            ));
        }
        let task_type = optional_str(task_data, "type").unwrap_or("general").to_string();
        let target = match explicit_target(task_data)? {
            Some(agent_type) => Some(agent_type),
            None => self.coordinator.match_agent_type(&task_type).await,
        };
        Ok((task_type, target))
    }

    /// 为已进入调度器的任务生成分配决策并开始跟踪
    async fn plan_assignment(
        &self,
        task_id: &str,
        task_type: String,
        target: Option<AgentType>,
        task_data: Value,
    ) {
        let preferred_agent = match optional_str(&task_data, "preferred_agent") {
            Some(agent_id) => Some(agent_id.to_string()),
            None => match explicit_target(&task_data).ok().flatten() {
                Some(agent_type) => self.ready_agent_of(agent_type).await,
                None => None,
            },
        };
        let target_agents = match target {
            Some(agent_type) => vec![agent_type.as_str().to_string()],
            None => AgentType::ALL.iter().map(|t| t.as_str().to_string()).collect(),
        };
        let decision = self
            .make_decision(
                DecisionType::TaskAssignment,
                target_agents,
                json!({
                    "task_id": task_id,
                    "task_type": task_type,
                    "task_data": task_data,
                    "preferred_agent": preferred_agent,
                }),
                format!(
                    "任务 {} 路由到 {}",
                    task_type,
                    target.map_or("auto", |t| t.as_str())
                ),
                if target.is_some() { 0.9 } else { 0.7 },
            )
            .await;

        let now = Utc::now();
        self.tasks.lock().await.insert(
            task_id.to_string(),
            TrackedTask {
                task_name: task_name(target, &task_type),
                task_type,
                target_agent_type: target,
                task_data,
                decision_id: decision.decision_id.clone(),
                status: TrackedTaskStatus::Queued,
                agent_id: None,
                claimed: None,
                created_at: now,
                updated_at: now,
            },
        );
        info!("任务已提交: {} (决策 {})", task_id, decision.decision_id);

        self.settle(vec![decision]).await;
    }

    async fn ready_agent_of(&self, agent_type: AgentType) -> Option<String> {
        self.coordinator
            .get_all_agents(Some(agent_type), Some(AgentState::Ready))
            .await
            .into_iter()
            .min_by_key(|a| a.task_count)
            .map(|a| a.agent_id)
    }

    /// 尚未就绪的任务推迟分配，由反馈周期再次尝试
    async fn assign_tracked_task(&self, params: &Value) -> OrchestratorResult<Value> {
        let task_id = required_str(params, "task_id")?;
        let task_type = optional_str(params, "task_type").unwrap_or("general");
        let task_data = params.get("task_data").cloned().unwrap_or_else(|| json!({}));
        let preferred_agent = optional_str(params, "preferred_agent");

        if let Some(state @ (TaskState::Scheduled | TaskState::Blocked)) =
            self.scheduler.get_task_state(task_id).await
        {
            debug!("任务 {} 尚未就绪 ({:?})，推迟分配", task_id, state);
            return Ok(json!({"task_id": task_id, "deferred": true, "task_state": state}));
        }

        let agent_id = self
            .coordinator
            .assign_task(task_id, task_type, task_data, preferred_agent)
            .await
            .ok_or_else(|| {
                OrchestratorError::Internal(format!("没有可用的Agent处理任务: {task_id} ({task_type})"))
            })?;
        let claimed = self.scheduler.take(task_id).await;

        let task_name = {
            let mut tasks = self.tasks.lock().await;
            tasks.get_mut(task_id).map(|tracked| {
                tracked.status = TrackedTaskStatus::Assigned;
                tracked.agent_id = Some(agent_id.clone());
                if claimed.is_some() {
                    tracked.claimed = claimed;
                }
                tracked.updated_at = Utc::now();
                tracked.task_name.clone()
            })
        };
        if let Some(task_name) = task_name {
            let queue = self.router.route(&task_name, TaskPriority::default()).queue;
            self.registry
                .record_start(task_id, &task_name, Some(&agent_id), Some(&queue))
                .await;
        }
        Ok(json!({"task_id": task_id, "agent_id": agent_id}))
    }

    /// 为排队中且已就绪的任务再次尝试分配Agent，返回分配成功的数量
    ///
    /// 按调度器的就绪顺序（优先级降序、提交时间升序）依次尝试。
    pub async fn dispatch_queued_tasks(&self) -> usize {
        let ordered = self.scheduler.queued_tasks().await;
        let queued: Vec<(String, String, Value)> = {
            let tasks = self.tasks.lock().await;
            ordered
                .iter()
                .filter_map(|task| {
                    let tracked = tasks.get(&task.id)?;
                    if tracked.status != TrackedTaskStatus::Queued {
                        return None;
                    }
                    // 调整过的优先级以调度器为准
                    let mut task_data = tracked.task_data.clone();
                    if let Some(data) = task_data.as_object_mut() {
                        data.insert("priority".to_string(), json!(task.priority));
                    }
                    Some((task.id.clone(), tracked.task_type.clone(), task_data))
                })
                .collect()
        };

        let mut assigned = 0;
        for (task_id, task_type, task_data) in queued {
            if self.scheduler.get_task_state(&task_id).await != Some(TaskState::Queued) {
                continue;
            }
            let params = json!({"task_id": task_id, "task_type": task_type, "task_data": task_data});
            match self.assign_tracked_task(&params).await {
                Ok(_) => assigned += 1,
                Err(e) => debug!("任务 {} 暂时无法分配: {}", task_id, e),
            }
        }
        assigned
    }

    /// Agent上报结果后收尾：成功则完成并提升依赖，失败则按退避重新入队
    async fn settle_task_result(&self, message: &AgentMessage) {
        let Some(task_id) = message.content.get("task_id").and_then(Value::as_str) else {
            return;
        };
        let success = message_succeeded(message);

        let (agent_id, claimed) = {
            let mut tasks = self.tasks.lock().await;
            let Some(tracked) = tasks.get_mut(task_id) else {
                return;
            };
            if tracked.status != TrackedTaskStatus::Assigned {
                return;
            }
            (tracked.agent_id.clone(), tracked.claimed.take())
        };

        if let Some(agent_id) = &agent_id {
            if let Err(e) = self
                .coordinator
                .complete_task(agent_id, task_id, Some(message.content.clone()), success)
                .await
            {
                debug!("无法在协调器中完成任务 {}: {}", task_id, e);
            }
        }

        let recurring_job = claimed.as_ref().and_then(job_id_of).map(str::to_string);
        let error = message_error(message);
        let status = if success {
            self.scheduler.mark_completed(task_id).await;
            self.registry
                .record_success(task_id, Some(message.content.clone()))
                .await;
            TrackedTaskStatus::Completed
        } else {
            match claimed {
                Some(task) => match self.scheduler.requeue_with_backoff(task).await {
                    RequeueOutcome::Requeued { .. } => {
                        self.registry.record_retry(task_id, error).await;
                        TrackedTaskStatus::Queued
                    }
                    RequeueOutcome::DeadLettered { .. } => {
                        self.registry.record_failure(task_id, error).await;
                        TrackedTaskStatus::Failed
                    }
                },
                None => {
                    self.registry.record_failure(task_id, error).await;
                    TrackedTaskStatus::Failed
                }
            }
        };

        if let Some(tracked) = self.tasks.lock().await.get_mut(task_id) {
            tracked.status = status;
            if status == TrackedTaskStatus::Queued {
                tracked.agent_id = None;
            }
            tracked.updated_at = Utc::now();
        }
        info!("任务 {} 结果已处理: {:?}", task_id, status);

        if let Some(job_id) = recurring_job {
            if status != TrackedTaskStatus::Queued {
                self.schedule_next_run(&job_id, task_id).await;
            }
        }
    }

    /// 周期任务的一次执行结束后安排下一次，沿用上一次的任务数据
    async fn schedule_next_run(&self, job_id: &str, finished_task_id: &str) {
        let Some((task_type, target, task_data)) = self
            .tasks
            .lock()
            .await
            .get(finished_task_id)
            .map(|t| (t.task_type.clone(), t.target_agent_type, t.task_data.clone()))
        else {
            return;
        };
        match self.recurring.handle_recurring_completion(job_id).await {
            Ok(Some(next_id)) => {
                info!("周期任务 {} 的下一次执行: {}", job_id, next_id);
                self.plan_assignment(&next_id, task_type, target, task_data).await;
            }
            Ok(None) => {}
            Err(e) => error!("周期任务 {} 安排下一次执行失败: {}", job_id, e),
        }
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatusView> {
        let tracked = self.tasks.lock().await.get(task_id).cloned()?;
        let scheduler_state = self.scheduler.get_task_state(task_id).await;
        Some(TaskStatusView {
            task_id: task_id.to_string(),
            task_type: tracked.task_type,
            status: tracked.status,
            target_agent_type: tracked.target_agent_type,
            agent_id: tracked.agent_id,
            decision_id: tracked.decision_id,
            scheduler_state,
            created_at: tracked.created_at,
            updated_at: tracked.updated_at,
        })
    }

    /// 取消尚未被Agent领取的任务
    pub async fn cancel_task(&self, task_id: &str) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().await;
        if let Some(tracked) = tasks.get(task_id) {
            if tracked.status != TrackedTaskStatus::Queued {
                return Ok(false);
            }
        }
        let removed = self.scheduler.cancel(task_id).await;
        let tracked = match tasks.get_mut(task_id) {
            Some(tracked) => {
                tracked.status = TrackedTaskStatus::Cancelled;
                tracked.updated_at = Utc::now();
                true
            }
            None => false,
        };
        drop(tasks);

        if tracked {
            // 重试等待中的任务已有执行记录
            self.registry.record_revoked(task_id).await;
            Ok(true)
        } else if removed {
            Ok(true)
        } else {
            Err(OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })
        }
    }

    // ========== 优化 ==========

    pub async fn set_strategy(&self, strategy: OptimizationStrategy) {
        info!("优化策略切换为 {}", strategy);
        self.optimizer.lock().await.set_strategy(strategy);
    }

    pub async fn strategy(&self) -> OptimizationStrategy {
        self.optimizer.lock().await.strategy()
    }

    pub async fn set_constraints(&self, constraints: OptimizationConstraints) {
        *self.constraints.write().await = constraints;
    }

    pub async fn set_resource_costs(&self, costs: BTreeMap<String, f64>) {
        self.optimizer.lock().await.set_resource_costs(costs);
    }

    pub async fn optimization_report(&self) -> Option<OptimizationReport> {
        self.optimizer.lock().await.get_optimization_report()
    }

    /// 汇总调度器、Worker池与洞察得到系统状态
    ///
    /// 队列负载 = 忙碌Worker数 + 路由到该队列的排队任务数。
    pub async fn build_system_state(&self) -> SystemState {
        let worker_stats = self.pool_manager.get_worker_stats(None).await;
        let queue_stats = self.scheduler.get_queue_stats().await;
        let queued = self.scheduler.queued_tasks().await;

        let mut state = SystemState {
            total_queue_depth: queue_stats.ready + queue_stats.delayed + queue_stats.pending_dependencies,
            captured_at: Some(Utc::now()),
            ..Default::default()
        };

        let mut utilizations = Vec::new();
        for (queue, pool) in &worker_stats.pools {
            state.workers.insert(queue.clone(), pool.active_workers);
            state
                .queue_loads
                .insert(queue.clone(), pool.busy_workers as f64);
            if pool.active_workers > 0 {
                utilizations.push(pool.utilization);
            }
        }
        if !utilizations.is_empty() {
            state.avg_worker_utilization = utilizations.iter().sum::<f64>() / utilizations.len() as f64;
        }

        for task in &queued {
            let route = self.router.route_task(task);
            *state.queue_loads.entry(route.queue).or_default() += 1.0;
        }
        state.pending_tasks = queued
            .iter()
            .map(|task| PendingTaskInfo {
                task_id: task.id.clone(),
                priority: task.priority,
                deadline: task.deadline,
                estimated_duration_seconds: task
                    .metadata
                    .get("estimated_duration")
                    .and_then(Value::as_f64),
            })
            .collect();

        let insights = self.insights.lock().await;
        state.latencies = insights.latencies();
        state.error_rates = insights.error_rates();
        state.error_rate = insights.overall_error_rate();
        state.avg_task_latency = insights.avg_latency();
        state
    }

    /// 按与上次快照之间的完成数计算每分钟吞吐
    async fn fill_throughput(&self, state: &mut SystemState, memory: &mut CycleMemory) {
        let now = state.captured_at.unwrap_or_else(Utc::now);
        let (counts, total) = {
            let insights = self.insights.lock().await;
            (insights.results_by_type().clone(), insights.total_tasks_processed())
        };

        if let Some((at, previous, previous_total)) = &memory.last_counts {
            let minutes = (now - *at).num_milliseconds() as f64 / 60_000.0;
            if minutes > 0.0 {
                state.tasks_per_minute = total.saturating_sub(*previous_total) as f64 / minutes;
                for (agent_type, count) in &counts {
                    let before = previous.get(agent_type).copied().unwrap_or(0);
                    state
                        .throughputs
                        .insert(agent_type.clone(), count.saturating_sub(before) as f64 / minutes);
                }
            }
        }
        memory.last_counts = Some((now, counts, total));
    }

    /// 运行一次优化周期，暂停、关闭或已有周期在运行时返回 None
    pub async fn run_optimization_cycle(&self) -> Option<OptimizationCycleReport> {
        let previous = {
            let mut state = self.state.write().await;
            if !state.accepts_cycles() {
                debug!("主控大脑处于 {} 状态，跳过优化周期", state.as_str());
                return None;
            }
            std::mem::replace(&mut *state, BrainState::Optimizing)
        };

        let report = self.optimization_pass().await;

        {
            let mut state = self.state.write().await;
            if *state == BrainState::Optimizing {
                *state = previous;
            }
        }
        self.counters.lock().await.optimization_cycles += 1;
        info!(
            "优化周期完成: {} 个决策，自动执行 {}，待审核 {}",
            report.decisions.len(),
            report.executed,
            report.queued_for_review
        );
        Some(report)
    }

    async fn optimization_pass(&self) -> OptimizationCycleReport {
        let mut system_state = self.build_system_state().await;
        let mut memory = self.memory.lock().await;
        self.fill_throughput(&mut system_state, &mut memory).await;

        let mut decisions = Vec::new();

        let (performance, frequent_errors) = {
            let mut insights = self.insights.lock().await;
            let errors = insights.frequent_errors();
            for pattern in &errors {
                insights.reset_error_pattern(&pattern.agent_type, &pattern.error_type);
            }
            (insights.agent_performance(), errors)
        };
        for (agent_type, perf) in performance {
            if perf.recent_trend == CompletionTrend::Increasing {
                decisions.push(
                    self.make_decision(
                        DecisionType::ResourceAllocation,
                        vec![agent_type.clone()],
                        json!({"queue": agent_type, "increase_workers": 1}),
                        format!("{agent_type} 完成耗时持续上升，增加Worker"),
                        0.85,
                    )
                    .await,
                );
            }
        }
        for pattern in frequent_errors {
            decisions.push(
                self.make_decision(
                    DecisionType::Optimization,
                    vec![pattern.agent_type.clone()],
                    json!({
                        "optimization_type": "reduce_load",
                        "queue": pattern.agent_type,
                        "rate_limit": "50/m",
                        "error_type": pattern.error_type,
                        "count": pattern.count,
                        "severity": if pattern.severe { "high" } else { "medium" },
                    }),
                    format!(
                        "{} 频繁出现 {} 错误 ({} 次)，降低负载",
                        pattern.agent_type, pattern.error_type, pattern.count
                    ),
                    0.9,
                )
                .await,
            );
        }

        let constraints = self.constraints.read().await.clone();
        let (strategy, changes, bottlenecks) = {
            let optimizer = self.optimizer.lock().await;
            (
                optimizer.strategy(),
                optimizer.optimize(&system_state, &constraints),
                optimizer.analyze_bottlenecks(&system_state),
            )
        };
        for bottleneck in &bottlenecks {
            warn!(
                "瓶颈: {} {:?} = {:.2} ({})",
                bottleneck.queue, bottleneck.kind, bottleneck.value, bottleneck.recommendation
            );
        }

        let mut change_decisions = Vec::new();
        for change in &changes {
            let decision = match change {
                OptimizationChange::ScaleWorkers {
                    queue,
                    target_workers,
                    reason,
                } => {
                    self.make_decision(
                        DecisionType::ResourceAllocation,
                        vec![queue.clone()],
                        json!({"queue": queue, "target_workers": target_workers, "strategy": strategy}),
                        reason.clone(),
                        0.8,
                    )
                    .await
                }
                OptimizationChange::UpdatePriority {
                    task_id,
                    new_priority,
                    reason,
                } => {
                    self.make_decision(
                        DecisionType::PriorityChange,
                        Vec::new(),
                        json!({"task_id": task_id, "new_priority": new_priority.value(), "strategy": strategy}),
                        reason.clone(),
                        0.95,
                    )
                    .await
                }
            };
            change_decisions.push((decision.decision_id.clone(), change.clone()));
            decisions.push(decision);
        }

        let decisions = self.settle(decisions).await;
        let applied: Vec<OptimizationChange> = change_decisions
            .into_iter()
            .filter(|(id, _)| {
                decisions
                    .iter()
                    .any(|d| &d.decision_id == id && d.executed)
            })
            .map(|(_, change)| change)
            .collect();

        let improvement = match memory.last_state.take() {
            Some(before) => {
                let changes_made = std::mem::take(&mut memory.last_changes);
                let result = self
                    .optimizer
                    .lock()
                    .await
                    .evaluate(&before, &system_state, changes_made);
                Some(result.improvement)
            }
            None => None,
        };
        memory.last_state = Some(system_state);
        memory.last_changes = applied;

        let executed = decisions.iter().filter(|d| d.executed).count();
        let queued_for_review = decisions.iter().filter(|d| d.is_pending()).count();
        OptimizationCycleReport {
            strategy,
            decisions,
            executed,
            queued_for_review,
            bottlenecks,
            improvement,
        }
    }

    // ========== 反馈 ==========

    /// 处理积压的反馈，把反馈动作转为决策；暂停或关闭时返回空
    pub async fn run_feedback_cycle(&self) -> Vec<Decision> {
        if !self.state().await.accepts_cycles() {
            return Vec::new();
        }

        let actions = self.feedback.process_feedback().await;
        let mut decisions = Vec::new();
        for action in &actions {
            let Some((decision_type, parameters, reasoning, confidence)) = decision_for_action(action) else {
                debug!("反馈动作 {} 没有对应的决策", action.action_type);
                continue;
            };
            decisions.push(
                self.make_decision(
                    decision_type,
                    vec![action.source.clone()],
                    parameters,
                    reasoning,
                    confidence,
                )
                .await,
            );
        }
        if !actions.is_empty() {
            debug!("反馈周期: {} 个动作，{} 个决策", actions.len(), decisions.len());
        }
        self.settle(decisions).await
    }

    // ========== 状态 ==========

    pub async fn get_agent_status(&self, agent_id: Option<&str>) -> BTreeMap<String, ObservedAgent> {
        let agents = self.agents.read().await;
        match agent_id {
            Some(id) => agents
                .get(id)
                .map(|a| BTreeMap::from([(id.to_string(), a.clone())]))
                .unwrap_or_default(),
            None => agents.clone(),
        }
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let queue = self.scheduler.get_queue_stats().await;
        let workers = self.pool_manager.get_worker_stats(None).await;
        let coordination = self.coordinator.get_coordination_stats().await;
        let strategy = self.strategy().await;
        let total_tasks_processed = self.insights.lock().await.total_tasks_processed();
        let pending_decisions = self.decisions.lock().await.pending.len();
        let tracked_tasks = self.tasks.lock().await.len();
        let observed_agents = self.agents.read().await.len();
        let counters = self.counters.lock().await;

        SystemStatus {
            brain_id: self.brain_id.clone(),
            state: self.state().await,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            strategy,
            total_tasks_processed,
            messages_received: counters.messages_received,
            decisions_executed: counters.decisions_executed,
            decisions_failed: counters.decisions_failed,
            optimization_cycles: counters.optimization_cycles,
            observed_agents,
            pending_decisions,
            tracked_tasks,
            queue,
            total_workers: workers.total_workers,
            active_workers: workers.active_workers,
            busy_workers: workers.busy_workers,
            coordination,
        }
    }

    // ========== 生命周期 ==========

    pub async fn pause(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == BrainState::Shutdown {
            return false;
        }
        *state = BrainState::Paused;
        info!("主控大脑已暂停");
        true
    }

    pub async fn resume(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != BrainState::Paused {
            return false;
        }
        *state = BrainState::Active;
        info!("主控大脑已恢复");
        true
    }

    /// 关闭后不再接收消息，也不再运行周期；后台循环由关闭信号结束
    pub async fn shutdown(&self) {
        *self.state.write().await = BrainState::Shutdown;
        let pending = self.feedback.pending_len().await;
        info!("主控大脑已关闭，未处理反馈 {} 条", pending);
    }

    /// 启动优化循环与反馈循环
    pub async fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        {
            let mut state = self.state.write().await;
            if *state == BrainState::Initializing {
                *state = BrainState::Active;
            }
        }
        info!("主控大脑已启动: {}", self.brain_id);

        let optimization_period = StdDuration::from_secs(self.config.optimization_interval_seconds.max(1));
        let brain = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        let optimization = tokio::spawn(async move {
            let mut ticker = interval(optimization_period);
            ticker.tick().await;
            info!("优化循环已启动，间隔 {:?}", optimization_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        brain.run_optimization_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("优化循环收到关闭信号");
                        break;
                    }
                }
            }
        });

        let feedback_period = StdDuration::from_secs(self.config.feedback_interval_seconds.max(1));
        let execution_retention = chrono::Duration::hours(self.config.execution_retention_hours as i64);
        let brain = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        let feedback = tokio::spawn(async move {
            let mut ticker = interval(feedback_period);
            ticker.tick().await;
            info!("反馈循环已启动，间隔 {:?}", feedback_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        brain.dispatch_queued_tasks().await;
                        brain.run_feedback_cycle().await;
                        brain.analytics.cleanup_old_metrics().await;
                        brain
                            .registry
                            .cleanup_old_executions(execution_retention)
                            .await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("反馈循环收到关闭信号");
                        break;
                    }
                }
            }
        });

        vec![optimization, feedback]
    }
}

fn task_name(target: Option<AgentType>, task_type: &str) -> String {
    format!("agents.{}.{}", target.map_or("auto", |t| t.as_str()), task_type)
}

fn explicit_target(task_data: &Value) -> OrchestratorResult<Option<AgentType>> {
    optional_str(task_data, "target_agent")
        .map(str::parse::<AgentType>)
        .transpose()
}

/// 失败消息中的错误描述
fn message_error(message: &AgentMessage) -> String {
    message
        .content
        .get("error")
        .and_then(Value::as_str)
        .map_or_else(|| format!("{} 上报失败", message.agent_id), str::to_string)
}

fn message_succeeded(message: &AgentMessage) -> bool {
    message
        .content
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(message.message_type != AgentMessageKind::Error)
}

/// 消息对应的反馈类型与影响分，内容中的 `feedback_type`/`impact_score` 优先
fn feedback_signal(message: &AgentMessage) -> Option<(String, f64)> {
    let defaults = match message.message_type {
        AgentMessageKind::Result if message_succeeded(message) => Some(("success", 0.0)),
        AgentMessageKind::Result => Some(("task_failure", -0.5)),
        AgentMessageKind::Error => Some(("error", -0.6)),
        AgentMessageKind::Metric => Some(("performance", 0.0)),
        _ => None,
    };
    let feedback_type = optional_str(&message.content, "feedback_type").or(defaults.map(|d| d.0))?;
    let impact = message
        .content_f64("impact_score")
        .or(defaults.map(|d| d.1))
        .unwrap_or(0.0);
    Some((feedback_type.to_string(), impact))
}

fn decision_for_action(action: &FeedbackAction) -> Option<(DecisionType, Value, String, f64)> {
    let source = action.source.as_str();
    match action.action_type.as_str() {
        "scale_up" => Some((
            DecisionType::ResourceAllocation,
            json!({"queue": source, "increase_workers": 1, "trigger": action.trigger}),
            format!("{source} 性能下降 ({})，扩容", action.trigger),
            0.85,
        )),
        "reduce_load" => Some((
            DecisionType::Optimization,
            json!({
                "optimization_type": "reduce_load",
                "queue": source,
                "rate_limit_reduction": 0.5,
                "trigger": action.trigger,
            }),
            format!("{source} 错误率过高 ({})，降低负载", action.trigger),
            0.9,
        )),
        "retry_with_adjustment" => {
            let task_id = action
                .parameters
                .get("task_data")
                .and_then(|d| d.get("task_id"))
                .and_then(Value::as_str)?;
            Some((
                DecisionType::PriorityChange,
                json!({"task_id": task_id, "priority_boost": 1, "trigger": action.trigger}),
                format!("任务 {task_id} 失败，提升优先级后重试"),
                0.9,
            ))
        }
        "maintain_or_scale_down" => Some((
            DecisionType::ResourceAllocation,
            json!({
                "queue": source,
                "increase_workers": -1,
                "max_utilization": 0.5,
                "trigger": action.trigger,
            }),
            format!("{source} 持续表现良好，利用率低于50%时缩容"),
            0.6,
        )),
        PATTERN_DETECTED => {
            let mut parameters = action.parameters.clone();
            if let Some(map) = parameters.as_object_mut() {
                map.insert("optimization_type".to_string(), json!("investigate"));
                map.insert("pattern".to_string(), json!(action.trigger));
                map.insert("feedback_type".to_string(), json!(action.feedback_type));
            }
            Some((
                DecisionType::Optimization,
                parameters,
                format!("{source}:{} 持续负面反馈，需要排查", action.feedback_type),
                0.5,
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: AgentMessageKind, content: Value) -> AgentMessage {
        AgentMessage::new("b-1", "backend", kind, content)
    }

    #[test]
    fn test_feedback_signal_defaults() {
        assert_eq!(
            feedback_signal(&message(AgentMessageKind::Result, json!({"duration": 1.0}))),
            Some(("success".to_string(), 0.0))
        );
        assert_eq!(
            feedback_signal(&message(AgentMessageKind::Result, json!({"success": false}))),
            Some(("task_failure".to_string(), -0.5))
        );
        assert_eq!(
            feedback_signal(&message(AgentMessageKind::Error, json!({}))),
            Some(("error".to_string(), -0.6))
        );
        assert_eq!(feedback_signal(&message(AgentMessageKind::Log, json!({}))), None);
        assert_eq!(
            feedback_signal(&message(
                AgentMessageKind::Log,
                json!({"feedback_type": "review", "impact_score": 0.9})
            )),
            Some(("review".to_string(), 0.9))
        );
    }

    #[test]
    fn test_feedback_actions_map_to_decisions() {
        let action = |action_type: &str, parameters: Value| FeedbackAction {
            action_type: action_type.to_string(),
            trigger: "rule".to_string(),
            source: "qa".to_string(),
            feedback_type: "task_failure".to_string(),
            parameters,
            timestamp: Utc::now(),
        };

        let (t, params, _, confidence) = decision_for_action(&action("scale_up", json!({}))).unwrap();
        assert_eq!(t, DecisionType::ResourceAllocation);
        assert_eq!(params["increase_workers"], 1);
        assert_eq!(confidence, 0.85);

        let (t, params, _, _) = decision_for_action(&action(
            "retry_with_adjustment",
            json!({"task_data": {"task_id": "t-1"}}),
        ))
        .unwrap();
        assert_eq!(t, DecisionType::PriorityChange);
        assert_eq!(params["task_id"], "t-1");
        assert!(decision_for_action(&action("retry_with_adjustment", json!({"task_data": {}}))).is_none());

        let (t, params, _, confidence) =
            decision_for_action(&action(PATTERN_DETECTED, json!({"avg_impact": -0.6}))).unwrap();
        assert_eq!(t, DecisionType::Optimization);
        assert_eq!(params["optimization_type"], "investigate");
        assert!(confidence < 0.9);
        assert!(decision_for_action(&action("unknown", json!({}))).is_none());
    }

    #[test]
    fn test_parse_time() {
        let params = json!({"deadline": "2030-01-01T00:00:00Z", "bad": "tomorrow"});
        assert!(parse_time(&params, "deadline").unwrap().is_some());
        assert!(parse_time(&params, "missing").unwrap().is_none());
        assert!(parse_time(&params, "bad").is_err());
    }
}
