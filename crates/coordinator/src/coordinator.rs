use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::{
    config::CoordinatorConfig, AgentInfo, AgentState, AgentType, Message, MessageType,
    OrchestratorError, OrchestratorResult, Recipient, RoutingRule, RoutingTable, TaskPriority,
};
use orchestrator_infrastructure::MetricsCollector;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::events::{CoordinatorEvent, CoordinatorEventType, EventBus, EventHandler};
use crate::mailbox::Mailboxes;
use crate::routing::default_agent_routing;
use crate::workflow::{StepOutcome, StepResult, Workflow, WorkflowStatus, WorkflowStep, WorkflowSummary};

/// 协调器自身作为发送方时使用的ID
pub const COORDINATOR_ID: &str = "coordinator";

/// 发送消息的可选参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    pub correlation_id: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub priority: u8,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            correlation_id: None,
            ttl_seconds: None,
            priority: 5,
        }
    }
}

impl MessageOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }
}

/// 尚未收到响应的请求，供不想阻塞的调用方自行等待
#[derive(Debug)]
pub struct PendingResponse {
    pub correlation_id: String,
    pub receiver: oneshot::Receiver<Value>,
}

/// 路由规则的自省视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRuleInfo {
    pub name: String,
    pub predicate: String,
    pub agent_type: AgentType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationStats {
    pub total_agents: usize,
    pub agents_by_type: BTreeMap<String, usize>,
    pub agents_by_state: BTreeMap<String, usize>,
    pub active_workflows: usize,
    pub pending_tasks: usize,
    pub total_messages_queued: usize,
    pub pending_responses: usize,
}

#[derive(Debug, Default)]
struct Registry {
    agents: HashMap<String, AgentInfo>,
    /// 按注册顺序
    by_type: BTreeMap<AgentType, Vec<String>>,
    /// task_id -> agent_id
    assignments: HashMap<String, String>,
}

impl Registry {
    fn is_routable(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|a| matches!(a.state, AgentState::Ready | AgentState::Busy))
    }

    /// READY中任务数最少的，没有READY时退而选择BUSY
    fn best_agent(&self, agent_type: AgentType) -> Option<String> {
        let candidates: Vec<&AgentInfo> = self
            .by_type
            .get(&agent_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.agents.get(id))
            .collect();

        [AgentState::Ready, AgentState::Busy]
            .into_iter()
            .find_map(|state| {
                candidates
                    .iter()
                    .filter(|a| a.state == state)
                    .min_by_key(|a| a.task_count)
                    .map(|a| a.agent_id.clone())
            })
    }
}

/// Agent协调器
///
/// Agent注册表、收件箱、待响应请求、工作流各自独立加锁。事件总是在释放锁之后触发，
/// 处理器可以安全地回调协调器。
pub struct AgentCoordinator {
    config: CoordinatorConfig,
    registry: RwLock<Registry>,
    mailboxes: Mutex<Mailboxes>,
    pending_responses: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    workflows: Mutex<HashMap<String, Workflow>>,
    routing: RwLock<RoutingTable<AgentType>>,
    events: EventBus,
    metrics: MetricsCollector,
}

impl AgentCoordinator {
    pub fn new(config: Option<CoordinatorConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            registry: RwLock::new(Registry::default()),
            mailboxes: Mutex::new(Mailboxes::new()),
            pending_responses: Mutex::new(HashMap::new()),
            workflows: Mutex::new(HashMap::new()),
            routing: RwLock::new(default_agent_routing()),
            events: EventBus::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ========== 注册 ==========

    pub async fn register_agent(&self, agent_type: AgentType, capabilities: Vec<String>) -> String {
        self.register_agent_with_metadata(agent_type, capabilities, BTreeMap::new())
            .await
    }

    pub async fn register_agent_with_metadata(
        &self,
        agent_type: AgentType,
        capabilities: Vec<String>,
        metadata: BTreeMap<String, Value>,
    ) -> String {
        let agent_id = format!(
            "{}-{}",
            agent_type,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut agent = AgentInfo::new(agent_id.clone(), agent_type, capabilities);
        agent.metadata = metadata;

        let total = {
            let mut registry = self.registry.write().await;
            registry.agents.insert(agent_id.clone(), agent);
            registry
                .by_type
                .entry(agent_type)
                .or_default()
                .push(agent_id.clone());
            registry.agents.len()
        };
        self.metrics.update_registered_agents(total);

        info!("Agent已注册: {} ({})", agent_id, agent_type);
        self.emit(
            CoordinatorEventType::AgentRegistered,
            json!({"agent_id": agent_id, "agent_type": agent_type}),
        )
        .await;
        agent_id
    }

    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let total = {
            let mut registry = self.registry.write().await;
            let Some(agent) = registry.agents.remove(agent_id) else {
                return false;
            };
            if let Some(ids) = registry.by_type.get_mut(&agent.agent_type) {
                ids.retain(|id| id != agent_id);
            }
            registry.assignments.retain(|_, assigned| assigned.as_str() != agent_id);
            registry.agents.len()
        };
        let dropped = self.mailboxes.lock().await.remove(agent_id);
        self.metrics.update_registered_agents(total);

        info!("Agent已注销: {} (丢弃 {} 条消息)", agent_id, dropped);
        self.emit(
            CoordinatorEventType::AgentUnregistered,
            json!({"agent_id": agent_id}),
        )
        .await;
        true
    }

    pub async fn update_agent_state(&self, agent_id: &str, state: AgentState) -> OrchestratorResult<()> {
        let previous = {
            let mut registry = self.registry.write().await;
            let agent = registry
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| agent_not_found(agent_id))?;
            std::mem::replace(&mut agent.state, state)
        };

        debug!("Agent状态变更: {} {:?} -> {:?}", agent_id, previous, state);
        self.emit(
            CoordinatorEventType::AgentStateChanged,
            json!({
                "agent_id": agent_id,
                "old_state": previous.as_str(),
                "new_state": state.as_str(),
            }),
        )
        .await;
        Ok(())
    }

    /// 刷新心跳时间，STARTING 的Agent转为 READY；ERROR 不会因心跳自动恢复
    pub async fn heartbeat(&self, agent_id: &str) -> OrchestratorResult<()> {
        let mut registry = self.registry.write().await;
        let agent = registry
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| agent_not_found(agent_id))?;
        agent.last_heartbeat = Some(Utc::now());
        if agent.state == AgentState::Starting {
            agent.state = AgentState::Ready;
            info!("Agent就绪: {}", agent_id);
        }
        Ok(())
    }

    // ========== 消息 ==========

    /// 发送消息，返回消息ID
    ///
    /// 按类型或广播投递时，每个接收方收到一份ID为 `{message_id}-{agent_id}` 的副本，
    /// 发送方自身不会收到。
    pub async fn send_message(
        &self,
        sender_id: &str,
        recipient: &Recipient,
        message_type: MessageType,
        content: Value,
        options: MessageOptions,
    ) -> String {
        let message_id = uuid::Uuid::new_v4().to_string();
        let base = Message {
            message_id: message_id.clone(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient.to_string(),
            message_type,
            content,
            correlation_id: options.correlation_id,
            ttl_seconds: options.ttl_seconds,
            priority: options.priority,
            timestamp: Utc::now(),
        };

        let fan_out: Option<Vec<String>> = match recipient {
            Recipient::Agent(_) => None,
            Recipient::AgentType(agent_type) => {
                let registry = self.registry.read().await;
                Some(registry.by_type.get(agent_type).cloned().unwrap_or_default())
            }
            Recipient::Broadcast => {
                let registry = self.registry.read().await;
                let mut ids: Vec<String> = registry.agents.keys().cloned().collect();
                ids.sort();
                Some(ids)
            }
        };

        let mut mailboxes = self.mailboxes.lock().await;
        match fan_out {
            None => mailboxes.deliver(base),
            Some(agent_ids) => {
                let recipients: Vec<String> =
                    agent_ids.into_iter().filter(|id| id != sender_id).collect();
                debug!("消息 {} 分发给 {} 个Agent", message_id, recipients.len());
                for agent_id in recipients {
                    let mut copy = base.clone();
                    copy.message_id = format!("{}-{}", message_id, agent_id);
                    copy.recipient_id = agent_id;
                    mailboxes.deliver(copy);
                }
            }
        }
        message_id
    }

    /// 取出最多 `limit` 条未过期消息，优先级高的在前
    pub async fn get_messages(
        &self,
        agent_id: &str,
        limit: usize,
        message_type: Option<MessageType>,
    ) -> Vec<Message> {
        self.mailboxes
            .lock()
            .await
            .take(agent_id, limit, message_type, Utc::now())
    }

    /// 发出请求但不等待，响应通过返回的接收端送达
    pub async fn send_request(
        &self,
        sender_id: &str,
        recipient: &Recipient,
        content: Value,
    ) -> PendingResponse {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_responses.lock().await;
            // 调用方已丢弃接收端的请求不会再被响应
            pending.retain(|_, tx| !tx.is_closed());
            pending.insert(correlation_id.clone(), tx);
        }

        self.send_message(
            sender_id,
            recipient,
            MessageType::Request,
            content,
            MessageOptions {
                correlation_id: Some(correlation_id.clone()),
                ..Default::default()
            },
        )
        .await;

        PendingResponse {
            correlation_id,
            receiver: rx,
        }
    }

    /// 发出请求并等待响应，超时返回 `None`
    pub async fn request_response(
        &self,
        sender_id: &str,
        recipient: &Recipient,
        content: Value,
        timeout: Option<Duration>,
    ) -> Option<Value> {
        let timeout = timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.default_request_timeout_seconds));
        let pending = self.send_request(sender_id, recipient, content).await;

        match tokio::time::timeout(timeout, pending.receiver).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("请求超时: correlation_id={}", pending.correlation_id);
                self.pending_responses
                    .lock()
                    .await
                    .remove(&pending.correlation_id);
                None
            }
        }
    }

    /// 完成一个等待中的请求；未知或已响应过的关联ID返回 false
    pub async fn send_response(&self, correlation_id: &str, content: Value) -> bool {
        let Some(tx) = self.pending_responses.lock().await.remove(correlation_id) else {
            debug!("忽略未知的响应: correlation_id={}", correlation_id);
            return false;
        };
        tx.send(content).is_ok()
    }

    // ========== 任务分配 ==========

    pub async fn resolve_agent_type(&self, task_type: &str) -> AgentType {
        self.routing.read().await.resolve(task_type)
    }

    /// 只返回由某条规则命中的Agent类型，落到默认目标时返回 `None`
    pub async fn match_agent_type(&self, task_type: &str) -> Option<AgentType> {
        self.routing
            .read()
            .await
            .find(task_type)
            .map(|rule| rule.target)
    }

    /// 分配任务，没有可用Agent时返回 `None`
    ///
    /// `preferred_agent` 只有在其状态为 READY 或 BUSY 时才会被采用。
    pub async fn assign_task(
        &self,
        task_id: &str,
        task_type: &str,
        task_data: Value,
        preferred_agent: Option<&str>,
    ) -> Option<String> {
        let agent_type = self.resolve_agent_type(task_type).await;

        let agent_id = {
            let mut registry = self.registry.write().await;
            let preferred = preferred_agent.filter(|id| registry.is_routable(id));
            if preferred_agent.is_some() && preferred.is_none() {
                warn!("指定的Agent不可用，改为自动选择: {:?}", preferred_agent);
            }
            let agent_id = match preferred {
                Some(id) => id.to_string(),
                None => registry.best_agent(agent_type)?,
            };

            let agent = registry.agents.get_mut(&agent_id)?;
            agent.state = AgentState::Busy;
            agent.current_task = Some(task_id.to_string());
            registry
                .assignments
                .insert(task_id.to_string(), agent_id.clone());
            agent_id
        };

        let priority = assignment_priority(&task_data);
        self.send_message(
            COORDINATOR_ID,
            &Recipient::Agent(agent_id.clone()),
            MessageType::TaskAssignment,
            json!({
                "task_id": task_id,
                "task_type": task_type,
                "task_data": task_data,
            }),
            MessageOptions::with_priority(priority),
        )
        .await;

        info!("任务 {} ({}) 分配给 {}", task_id, task_type, agent_id);
        self.emit(
            CoordinatorEventType::TaskAssigned,
            json!({"task_id": task_id, "task_type": task_type, "agent_id": agent_id}),
        )
        .await;
        Some(agent_id)
    }

    pub async fn complete_task(
        &self,
        agent_id: &str,
        task_id: &str,
        result: Option<Value>,
        success: bool,
    ) -> OrchestratorResult<()> {
        {
            let mut registry = self.registry.write().await;
            let agent = registry
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| agent_not_found(agent_id))?;
            agent.current_task = None;
            agent.task_count += 1;
            if !success {
                agent.error_count += 1;
            }
            if agent.state == AgentState::Busy {
                agent.state = AgentState::Ready;
            }
            registry.assignments.remove(task_id);
        }

        debug!("任务完成: {} by {} (success={})", task_id, agent_id, success);
        self.emit(
            CoordinatorEventType::TaskCompleted,
            json!({
                "agent_id": agent_id,
                "task_id": task_id,
                "success": success,
                "result": result,
            }),
        )
        .await;
        Ok(())
    }

    pub async fn task_assignment(&self, task_id: &str) -> Option<String> {
        self.registry.read().await.assignments.get(task_id).cloned()
    }

    // ========== 工作流 ==========

    pub async fn start_workflow(
        &self,
        name: &str,
        steps: Vec<WorkflowStep>,
        context: Map<String, Value>,
    ) -> String {
        let mut workflow = Workflow::new(name, steps, context);
        let workflow_id = workflow.workflow_id.clone();
        info!("启动工作流: {} ({}, {} 步)", name, workflow_id, workflow.steps.len());

        if workflow.steps.is_empty() {
            workflow.status = WorkflowStatus::Completed;
            workflow.completed_at = Some(Utc::now());
            self.workflows.lock().await.insert(workflow_id.clone(), workflow);
            self.emit(
                CoordinatorEventType::WorkflowCompleted,
                json!({"workflow_id": workflow_id}),
            )
            .await;
            return workflow_id;
        }

        self.workflows
            .lock()
            .await
            .insert(workflow_id.clone(), workflow);
        self.dispatch_workflow_step(&workflow_id).await;
        workflow_id
    }

    /// 记录当前步骤的结果并推进到下一步，返回推进后的状态
    pub async fn advance_workflow(
        &self,
        workflow_id: &str,
        step_result: StepResult,
    ) -> OrchestratorResult<WorkflowStatus> {
        let outcome = {
            let mut workflows = self.workflows.lock().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                    id: workflow_id.to_string(),
                })?;
            if workflow.status != WorkflowStatus::Running {
                return Ok(workflow.status);
            }
            workflow.record_result(step_result)
        };

        match outcome {
            StepOutcome::Next => self.dispatch_workflow_step(workflow_id).await,
            StepOutcome::Completed => {
                info!("工作流完成: {}", workflow_id);
                self.emit(
                    CoordinatorEventType::WorkflowCompleted,
                    json!({"workflow_id": workflow_id}),
                )
                .await;
            }
            StepOutcome::Failed => self.emit_workflow_failed(workflow_id).await,
        }

        self.workflow_status(workflow_id)
            .await
            .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                id: workflow_id.to_string(),
            })
    }

    async fn dispatch_workflow_step(&self, workflow_id: &str) {
        let next_step = {
            let workflows = self.workflows.lock().await;
            workflows.get(workflow_id).and_then(|wf| {
                wf.current()
                    .map(|step| (step.task_type.clone(), wf.step_task_data()))
            })
        };
        let Some((task_type, task_data)) = next_step else {
            return;
        };

        let task_id = uuid::Uuid::new_v4().to_string();
        let assigned = self.assign_task(&task_id, &task_type, task_data, None).await;

        let failed = {
            let mut workflows = self.workflows.lock().await;
            let Some(workflow) = workflows.get_mut(workflow_id) else {
                return;
            };
            match assigned {
                Some(agent_id) => {
                    workflow.status = WorkflowStatus::Running;
                    workflow.current_task_id = Some(task_id);
                    workflow.current_agent = Some(agent_id);
                    false
                }
                None => {
                    workflow.fail(format!(
                        "没有可用的Agent执行步骤 {} ({})",
                        workflow.current_step, task_type
                    ));
                    true
                }
            }
        };
        if failed {
            self.emit_workflow_failed(workflow_id).await;
        }
    }

    async fn emit_workflow_failed(&self, workflow_id: &str) {
        let error = self
            .workflows
            .lock()
            .await
            .get(workflow_id)
            .and_then(|wf| wf.error.clone());
        warn!("工作流失败: {}: {:?}", workflow_id, error);
        self.emit(
            CoordinatorEventType::WorkflowFailed,
            json!({"workflow_id": workflow_id, "error": error}),
        )
        .await;
    }

    async fn workflow_status(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        self.workflows.lock().await.get(workflow_id).map(|wf| wf.status)
    }

    pub async fn get_workflow_status(&self, workflow_id: &str) -> Option<WorkflowSummary> {
        self.workflows
            .lock()
            .await
            .get(workflow_id)
            .map(Workflow::summary)
    }

    // ========== 事件 ==========

    pub async fn on_event(&self, event_type: CoordinatorEventType, handler: Arc<dyn EventHandler>) {
        self.events.subscribe(event_type, handler).await;
    }

    async fn emit(&self, event_type: CoordinatorEventType, data: Value) {
        self.events.emit(CoordinatorEvent::new(event_type, data)).await;
    }

    // ========== 路由表 ==========

    pub async fn set_routing_rules(&self, rules: Vec<RoutingRule<AgentType>>) {
        self.routing.write().await.set_rules(rules);
    }

    /// 插入路由规则，`index` 为空时追加到末尾
    pub async fn add_routing_rule(&self, rule: RoutingRule<AgentType>, index: Option<usize>) {
        let mut routing = self.routing.write().await;
        match index {
            Some(index) => routing.insert(index, rule),
            None => routing.push(rule),
        }
    }

    pub async fn routing_rules(&self) -> Vec<RoutingRuleInfo> {
        self.routing
            .read()
            .await
            .rules()
            .iter()
            .map(|rule| RoutingRuleInfo {
                name: rule.name.clone(),
                predicate: rule.predicate.describe(),
                agent_type: rule.target,
            })
            .collect()
    }

    // ========== 查询 ==========

    pub async fn get_agent_info(&self, agent_id: &str) -> Option<AgentInfo> {
        self.registry.read().await.agents.get(agent_id).cloned()
    }

    /// 按注册时间排序
    pub async fn get_all_agents(
        &self,
        agent_type: Option<AgentType>,
        state: Option<AgentState>,
    ) -> Vec<AgentInfo> {
        let registry = self.registry.read().await;
        let mut agents: Vec<AgentInfo> = registry
            .agents
            .values()
            .filter(|a| agent_type.map_or(true, |t| a.agent_type == t))
            .filter(|a| state.map_or(true, |s| a.state == s))
            .cloned()
            .collect();
        agents.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        agents
    }

    pub async fn mailbox_len(&self, agent_id: &str) -> usize {
        self.mailboxes.lock().await.len(agent_id)
    }

    pub async fn get_coordination_stats(&self) -> CoordinationStats {
        let mut stats = CoordinationStats::default();
        {
            let registry = self.registry.read().await;
            stats.total_agents = registry.agents.len();
            for (agent_type, ids) in &registry.by_type {
                stats
                    .agents_by_type
                    .insert(agent_type.as_str().to_string(), ids.len());
            }
            for state in AgentState::ALL {
                let count = registry.agents.values().filter(|a| a.state == state).count();
                stats.agents_by_state.insert(state.as_str().to_string(), count);
            }
            stats.pending_tasks = registry.assignments.len();
        }
        stats.active_workflows = self
            .workflows
            .lock()
            .await
            .values()
            .filter(|wf| !wf.status.is_terminal())
            .count();
        stats.total_messages_queued = self.mailboxes.lock().await.total();
        stats.pending_responses = {
            let mut pending = self.pending_responses.lock().await;
            pending.retain(|_, tx| !tx.is_closed());
            pending.len()
        };
        stats
    }

    // ========== 健康检查 ==========

    pub async fn check_agent_health(&self) -> Vec<String> {
        self.check_agent_health_at(Utc::now()).await
    }

    /// 心跳超时的Agent置为 ERROR，返回本次被标记的Agent
    ///
    /// 从未发送过心跳的Agent仍停留在 STARTING，不参与超时判断，也不会被分配任务。
    pub async fn check_agent_health_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(self.config.heartbeat_timeout_seconds as i64);
        let mut unhealthy = Vec::new();
        {
            let mut registry = self.registry.write().await;
            for agent in registry.agents.values_mut() {
                if matches!(agent.state, AgentState::Offline | AgentState::Error) {
                    continue;
                }
                let Some(last_seen) = agent.last_heartbeat else {
                    continue;
                };
                if now - last_seen > timeout {
                    agent.state = AgentState::Error;
                    unhealthy.push((agent.agent_id.clone(), last_seen));
                }
            }
        }

        for (agent_id, last_seen) in &unhealthy {
            warn!("Agent心跳超时: {} (最后心跳 {})", agent_id, last_seen);
            self.emit(
                CoordinatorEventType::AgentUnhealthy,
                json!({
                    "agent_id": agent_id,
                    "reason": "heartbeat_timeout",
                    "last_heartbeat": last_seen.to_rfc3339(),
                }),
            )
            .await;
        }
        unhealthy.into_iter().map(|(id, _)| id).collect()
    }

    pub fn start_health_monitoring(
        self: &Arc<Self>,
        interval_duration: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            info!("Agent健康监控已启动，间隔 {:?}", interval_duration);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.check_agent_health().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Agent健康监控停止");
                        break;
                    }
                }
            }
        })
    }
}

fn agent_not_found(agent_id: &str) -> OrchestratorError {
    OrchestratorError::AgentNotFound {
        id: agent_id.to_string(),
    }
}

/// 任务数据中的 `priority` 可以是档位名 ("critical") 或数值，缺失或无法识别时按 medium 处理
fn assignment_priority(task_data: &Value) -> u8 {
    let default = TaskPriority::default().value();
    match task_data.get("priority") {
        Some(Value::Number(n)) => n.as_u64().map_or(default, |p| p.min(u8::MAX as u64) as u8),
        Some(Value::String(s)) => s
            .parse::<TaskPriority>()
            .map_or(default, |priority| priority.value()),
        _ => default,
    }
}
