//! 控制面命令
//!
//! 外部网关通过命令操作系统，命令状态依次经过
//! `queued → processing → completed | failed`，可按 `command_id` 查询。
//! 指定了 `callback_url` 的命令在结束后把记录POST到该地址，回调失败只记录日志。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::{
    config::ApiConfig, AgentInfo, AgentState, AgentType, MessageType, OrchestratorError,
    OrchestratorResult, TaskPriority,
};
use orchestrator_dispatcher::ExecutionFilter;
use orchestrator_infrastructure::MetricsCollector;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::master_brain::{BrainState, MasterBrain};
use crate::message::{AgentMessage, AgentMessageKind};
use crate::optimizer::OptimizationStrategy;
use crate::params::{
    optional_bool, optional_f64, optional_str, optional_u64, parse_time, required_str,
};

/// 保留的命令记录数，超出后丢弃最早的
const COMMAND_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SubmitTask,
    CancelTask,
    GetTaskStatus,
    RegisterAgent,
    StopAgent,
    GetAgentStatus,
    SystemStatus,
    HealthCheck,
    Optimize,
    ScalePool,
    Notify,
    Heartbeat,
    GetMessages,
    ReportResult,
    ReportFeedback,
    ScheduleRecurring,
    CancelRecurring,
    TaskMetrics,
}

impl CommandType {
    pub const ALL: [CommandType; 18] = [
        CommandType::SubmitTask,
        CommandType::CancelTask,
        CommandType::GetTaskStatus,
        CommandType::RegisterAgent,
        CommandType::StopAgent,
        CommandType::GetAgentStatus,
        CommandType::SystemStatus,
        CommandType::HealthCheck,
        CommandType::Optimize,
        CommandType::ScalePool,
        CommandType::Notify,
        CommandType::Heartbeat,
        CommandType::GetMessages,
        CommandType::ReportResult,
        CommandType::ReportFeedback,
        CommandType::ScheduleRecurring,
        CommandType::CancelRecurring,
        CommandType::TaskMetrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::SubmitTask => "submit_task",
            CommandType::CancelTask => "cancel_task",
            CommandType::GetTaskStatus => "get_task_status",
            CommandType::RegisterAgent => "register_agent",
            CommandType::StopAgent => "stop_agent",
            CommandType::GetAgentStatus => "get_agent_status",
            CommandType::SystemStatus => "system_status",
            CommandType::HealthCheck => "health_check",
            CommandType::Optimize => "optimize",
            CommandType::ScalePool => "scale_pool",
            CommandType::Notify => "notify",
            CommandType::Heartbeat => "heartbeat",
            CommandType::GetMessages => "get_messages",
            CommandType::ReportResult => "report_result",
            CommandType::ReportFeedback => "report_feedback",
            CommandType::ScheduleRecurring => "schedule_recurring",
            CommandType::CancelRecurring => "cancel_recurring",
            CommandType::TaskMetrics => "task_metrics",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("未知的命令: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: CommandType,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl CommandRequest {
    pub fn new(command: CommandType, parameters: Value) -> Self {
        Self {
            command,
            parameters,
            priority: TaskPriority::default(),
            callback_url: None,
            metadata: Map::new(),
        }
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command_id: String,
    pub command: CommandType,
    pub status: CommandStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommandRecord {
    pub fn is_finished(&self) -> bool {
        matches!(self.status, CommandStatus::Completed | CommandStatus::Failed)
    }
}

#[derive(Debug, Default)]
struct CommandLog {
    records: HashMap<String, CommandRecord>,
    order: VecDeque<String>,
}

impl CommandLog {
    fn insert(&mut self, record: CommandRecord) {
        if !self.records.contains_key(&record.command_id) {
            self.order.push_back(record.command_id.clone());
        }
        self.records.insert(record.command_id.clone(), record);
        while self.order.len() > COMMAND_HISTORY_LIMIT {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }
}

pub struct ControlPlane {
    brain: Arc<MasterBrain>,
    config: ApiConfig,
    http: reqwest::Client,
    commands: RwLock<CommandLog>,
    metrics: MetricsCollector,
}

impl ControlPlane {
    pub fn new(brain: Arc<MasterBrain>, config: Option<ApiConfig>) -> Self {
        let config = config.unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.callback_timeout_seconds))
            .build()
            .unwrap_or_else(|e| {
                warn!("构建回调HTTP客户端失败，使用默认客户端: {}", e);
                reqwest::Client::new()
            });
        Self {
            brain,
            config,
            http,
            commands: RwLock::new(CommandLog::default()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn brain(&self) -> &Arc<MasterBrain> {
        &self.brain
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// 执行命令并返回最终记录
    ///
    /// 命令本身的失败体现在记录的 `status`/`error` 上，不作为错误返回。
    pub async fn execute_command(&self, request: CommandRequest) -> CommandRecord {
        let mut record = CommandRecord {
            command_id: uuid::Uuid::new_v4().to_string(),
            command: request.command,
            status: CommandStatus::Queued,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.commands.write().await.insert(record.clone());

        record.status = CommandStatus::Processing;
        self.commands.write().await.insert(record.clone());
        info!("执行命令 {} ({})", request.command, record.command_id);

        match self.dispatch(&request).await {
            Ok(result) => {
                record.status = CommandStatus::Completed;
                record.result = Some(result);
                self.metrics.record_command_processed(request.command.as_str(), true);
            }
            Err(e) => {
                error!("命令 {} 执行失败: {}", request.command, e);
                record.status = CommandStatus::Failed;
                record.error = Some(e.to_string());
                self.metrics.record_command_processed(request.command.as_str(), false);
            }
        }
        record.completed_at = Some(Utc::now());
        self.commands.write().await.insert(record.clone());

        if let Some(url) = &request.callback_url {
            self.send_callback(url, &record).await;
        }
        record
    }

    pub async fn get_command_status(&self, command_id: &str) -> Option<CommandRecord> {
        self.commands.read().await.records.get(command_id).cloned()
    }

    pub async fn command_count(&self) -> usize {
        self.commands.read().await.records.len()
    }

    async fn send_callback(&self, url: &str, record: &CommandRecord) {
        match self.http.post(url).json(record).send().await {
            Ok(response) => info!("回调已发送 {}: {}", url, response.status()),
            Err(e) => error!("回调失败 {}: {}", url, e),
        }
    }

    async fn dispatch(&self, request: &CommandRequest) -> OrchestratorResult<Value> {
        let params = &request.parameters;
        match request.command {
            CommandType::SubmitTask => self.submit_task(params, request.priority).await,
            CommandType::CancelTask => {
                let task_id = required_str(params, "task_id")?;
                let cancelled = self.brain.cancel_task(task_id).await?;
                Ok(json!({"task_id": task_id, "cancelled": cancelled}))
            }
            CommandType::GetTaskStatus => {
                let task_id = required_str(params, "task_id")?;
                let status = self.brain.get_task_status(task_id).await.ok_or_else(|| {
                    OrchestratorError::TaskNotFound {
                        id: task_id.to_string(),
                    }
                })?;
                to_value(&status)
            }
            CommandType::RegisterAgent => {
                let agent_type: AgentType = required_str(params, "agent_type")?.parse()?;
                let capabilities = params
                    .get("capabilities")
                    .and_then(Value::as_array)
                    .map(|caps| {
                        caps.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let agent_id = self
                    .brain
                    .coordinator()
                    .register_agent(agent_type, capabilities)
                    .await;
                Ok(json!({"agent_id": agent_id, "agent_type": agent_type}))
            }
            CommandType::StopAgent => {
                let agent_id = required_str(params, "agent_id")?;
                if !self.brain.coordinator().unregister_agent(agent_id).await {
                    return Err(OrchestratorError::AgentNotFound {
                        id: agent_id.to_string(),
                    });
                }
                Ok(json!({"agent_id": agent_id, "stopped": true}))
            }
            CommandType::GetAgentStatus => self.agent_status(params).await,
            CommandType::SystemStatus => to_value(&self.brain.get_system_status().await),
            CommandType::HealthCheck => Ok(self.health_check().await),
            CommandType::Optimize => {
                if let Some(strategy) = optional_str(params, "strategy") {
                    let strategy: OptimizationStrategy = strategy.parse()?;
                    self.brain.set_strategy(strategy).await;
                }
                match self.brain.run_optimization_cycle().await {
                    Some(report) => Ok(json!({"optimization": "completed", "report": to_value(&report)?})),
                    None => Ok(json!({
                        "optimization": "skipped",
                        "reason": format!("主控大脑状态为 {}", self.brain.state().await.as_str()),
                    })),
                }
            }
            CommandType::ScalePool => {
                let queue = required_str(params, "queue")?;
                let target = optional_u64(params, "target_workers")?.ok_or_else(|| {
                    OrchestratorError::InvalidCommand("缺少参数: target_workers".to_string())
                })? as usize;
                let started = self.brain.pool_manager().scale_pool(queue, target).await?;
                let stats = self.brain.pool_manager().get_worker_stats(Some(queue)).await;
                Ok(json!({
                    "queue": queue,
                    "requested_workers": target,
                    "active_workers": stats.active_workers,
                    "started": started.iter().map(|w| w.worker_id.clone()).collect::<Vec<_>>(),
                }))
            }
            CommandType::Notify => {
                let event_type = required_str(params, "event_type")?;
                let data = params.get("data").cloned().unwrap_or_else(empty_object);
                self.brain.receive_notification(event_type, data).await;
                Ok(json!({"event_type": event_type, "delivered": true}))
            }
            CommandType::Heartbeat => {
                let agent_id = required_str(params, "agent_id")?;
                self.brain.coordinator().heartbeat(agent_id).await?;
                let info = self.registered_agent(agent_id).await?;
                Ok(json!({"agent_id": agent_id, "state": info.state}))
            }
            CommandType::GetMessages => self.get_messages(params).await,
            CommandType::ReportResult => self.report_result(params).await,
            CommandType::ReportFeedback => {
                let agent_id = required_str(params, "agent_id")?;
                let feedback_type = required_str(params, "feedback_type")?;
                let impact_score = optional_f64(params, "impact_score")?.ok_or_else(|| {
                    OrchestratorError::InvalidCommand("缺少参数: impact_score".to_string())
                })?;
                let info = self.registered_agent(agent_id).await?;
                let data = params.get("data").cloned().unwrap_or_else(empty_object);
                let feedback = self.brain.feedback();
                feedback
                    .submit_feedback(info.agent_type.as_str(), feedback_type, data, impact_score)
                    .await;
                Ok(json!({
                    "agent_id": agent_id,
                    "feedback_type": feedback_type,
                    "pending_feedback": feedback.pending_len().await,
                }))
            }
            CommandType::ScheduleRecurring => self.schedule_recurring(params, request.priority).await,
            CommandType::CancelRecurring => {
                let job_id = required_str(params, "job_id")?;
                let cancelled = self.brain.cancel_recurring(job_id).await;
                Ok(json!({"job_id": job_id, "cancelled": cancelled}))
            }
            CommandType::TaskMetrics => {
                let registry = self.brain.task_registry();
                let task_name = optional_str(params, "task_name");
                let limit = optional_u64(params, "limit")?.unwrap_or(20) as usize;
                let stats: Map<String, Value> = registry
                    .get_stats(task_name)
                    .await
                    .into_iter()
                    .map(|(name, stats)| {
                        let value = json!({
                            "total_runs": stats.total_runs,
                            "successes": stats.successes,
                            "failures": stats.failures,
                            "retries": stats.retries,
                            "success_rate": stats.success_rate(),
                            "avg_duration_seconds": stats.avg_duration_seconds(),
                            "last_run": stats.last_run,
                        });
                        (name, value)
                    })
                    .collect();
                let executions = registry
                    .get_executions(&ExecutionFilter {
                        task_name: task_name.map(str::to_string),
                        limit,
                        ..Default::default()
                    })
                    .await;
                Ok(json!({"stats": stats, "recent_executions": to_value(&executions)?}))
            }
        }
    }

    async fn registered_agent(&self, agent_id: &str) -> OrchestratorResult<AgentInfo> {
        self.brain
            .coordinator()
            .get_agent_info(agent_id)
            .await
            .ok_or_else(|| OrchestratorError::AgentNotFound {
                id: agent_id.to_string(),
            })
    }

    /// Agent拉取自己的收件箱，`message_type` 可选
    async fn get_messages(&self, params: &Value) -> OrchestratorResult<Value> {
        let agent_id = required_str(params, "agent_id")?;
        self.registered_agent(agent_id).await?;
        let limit = optional_u64(params, "limit")?.unwrap_or(10) as usize;
        let message_type = optional_str(params, "message_type")
            .map(|raw| {
                serde_json::from_value::<MessageType>(json!(raw)).map_err(|_| {
                    OrchestratorError::InvalidCommand(format!("未知的消息类型: {raw}"))
                })
            })
            .transpose()?;
        let messages = self
            .brain
            .coordinator()
            .get_messages(agent_id, limit, message_type)
            .await;
        Ok(json!({"agent_id": agent_id, "count": messages.len(), "messages": to_value(&messages)?}))
    }

    /// Agent上报任务结果，按结果消息交给主控大脑收尾
    async fn report_result(&self, params: &Value) -> OrchestratorResult<Value> {
        let agent_id = required_str(params, "agent_id")?;
        let task_id = required_str(params, "task_id")?;
        let success = optional_bool(params, "success")?.unwrap_or(true);
        let info = self.registered_agent(agent_id).await?;

        let mut content = params.as_object().cloned().unwrap_or_default();
        content.insert("success".to_string(), json!(success));
        let kind = if success {
            AgentMessageKind::Result
        } else {
            AgentMessageKind::Error
        };
        self.brain
            .receive_message(AgentMessage::new(
                agent_id,
                info.agent_type.as_str(),
                kind,
                Value::Object(content),
            ))
            .await;

        let status = self
            .brain
            .get_task_status(task_id)
            .await
            .map(|s| s.status);
        Ok(json!({"task_id": task_id, "success": success, "status": status}))
    }

    /// 参数与 submit_task 相同，另需 `interval_seconds`，`start_at` 可选
    async fn schedule_recurring(&self, params: &Value, priority: TaskPriority) -> OrchestratorResult<Value> {
        let interval_seconds = optional_u64(params, "interval_seconds")?.ok_or_else(|| {
            OrchestratorError::InvalidCommand("缺少参数: interval_seconds".to_string())
        })?;
        let start_at = parse_time(params, "start_at")?;
        let mut task_data = task_data_from(params, priority)?;
        task_data.remove("interval_seconds");
        task_data.remove("start_at");

        let job_id = self
            .brain
            .schedule_recurring(
                Value::Object(task_data),
                chrono::Duration::seconds(interval_seconds as i64),
                start_at,
            )
            .await?;
        let job = self.brain.recurring().get_job(&job_id).await;
        Ok(json!({"job_id": job_id, "job": to_value(&job)?}))
    }

    /// 命令参数中的 `task_type` 对应任务数据的 `type`，未指定优先级时使用命令优先级
    async fn submit_task(&self, params: &Value, priority: TaskPriority) -> OrchestratorResult<Value> {
        let task_data = task_data_from(params, priority)?;
        let task_id = self.brain.submit_task(Value::Object(task_data)).await?;
        let status = self
            .brain
            .get_task_status(&task_id)
            .await
            .map(|s| s.status);
        Ok(json!({"task_id": task_id, "status": status}))
    }

    async fn agent_status(&self, params: &Value) -> OrchestratorResult<Value> {
        let coordinator = self.brain.coordinator();
        if let Some(agent_id) = optional_str(params, "agent_id") {
            let info = coordinator
                .get_agent_info(agent_id)
                .await
                .ok_or_else(|| OrchestratorError::AgentNotFound {
                    id: agent_id.to_string(),
                })?;
            let observed = self.brain.get_agent_status(Some(agent_id)).await;
            return Ok(json!({
                "agent": to_value(&info)?,
                "observed": to_value(&observed.get(agent_id))?,
            }));
        }

        let agent_type = optional_str(params, "agent_type")
            .map(str::parse::<AgentType>)
            .transpose()?;
        let state = optional_str(params, "state")
            .map(parse_agent_state)
            .transpose()?;
        let agents = coordinator.get_all_agents(agent_type, state).await;
        Ok(json!({"count": agents.len(), "agents": to_value(&agents)?}))
    }

    async fn health_check(&self) -> Value {
        let unhealthy_agents = self.brain.coordinator().check_agent_health().await;
        let state = self.brain.state().await;
        let workers = self.brain.pool_manager().get_worker_stats(None).await;
        let queue = self.brain.scheduler().get_queue_stats().await;

        let healthy = !matches!(state, BrainState::Error | BrainState::Shutdown)
            && queue.mirror_bands.is_some();
        json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "timestamp": Utc::now(),
            "brain_state": state,
            "active_workers": workers.active_workers,
            "unhealthy_agents": unhealthy_agents,
            "queue_ready": queue.ready,
            "mirror_available": queue.mirror_bands.is_some(),
            "mirror_errors": queue.mirror_errors,
        })
    }
}

/// 命令参数转为任务数据：`task_type` 改名为 `type`，缺省优先级取命令优先级
fn task_data_from(params: &Value, priority: TaskPriority) -> OrchestratorResult<Map<String, Value>> {
    let mut task_data = match params {
        Value::Object(map) => map.clone(),
        _ => {
            return Err(OrchestratorError::InvalidCommand(
                "任务参数必须是JSON对象".to_string(),
            ))
        }
    };
    if let Some(task_type) = task_data.remove("task_type") {
        task_data.entry("type").or_insert(task_type);
    }
    task_data
        .entry("priority")
        .or_insert_with(|| json!(priority));
    Ok(task_data)
}

fn parse_agent_state(raw: &str) -> OrchestratorResult<AgentState> {
    AgentState::ALL
        .into_iter()
        .find(|s| s.as_str().eq_ignore_ascii_case(raw))
        .ok_or_else(|| OrchestratorError::InvalidCommand(format!("未知的Agent状态: {raw}")))
}

fn to_value<T: Serialize>(value: &T) -> OrchestratorResult<Value> {
    serde_json::to_value(value).map_err(|e| OrchestratorError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_names_round_trip_through_from_str() {
        for command in CommandType::ALL {
            assert_eq!(command.as_str().parse::<CommandType>().unwrap(), command);
        }
        assert!("deploy_app".parse::<CommandType>().is_err());
    }

    #[test]
    fn test_command_request_defaults() {
        let request: CommandRequest =
            serde_json::from_value(json!({"command": "health_check"})).unwrap();
        assert_eq!(request.command, CommandType::HealthCheck);
        assert_eq!(request.priority, TaskPriority::Medium);
        assert!(request.parameters.as_object().is_some_and(|p| p.is_empty()));
        assert!(request.callback_url.is_none());
    }

    #[test]
    fn test_command_log_evicts_oldest() {
        let mut log = CommandLog::default();
        for i in 0..COMMAND_HISTORY_LIMIT + 2 {
            log.insert(CommandRecord {
                command_id: format!("c-{i}"),
                command: CommandType::HealthCheck,
                status: CommandStatus::Completed,
                result: None,
                error: None,
                started_at: Utc::now(),
                completed_at: None,
            });
        }
        assert_eq!(log.records.len(), COMMAND_HISTORY_LIMIT);
        assert!(!log.records.contains_key("c-0"));
        assert!(log.records.contains_key("c-2"));
    }

    #[test]
    fn test_parse_agent_state() {
        assert_eq!(parse_agent_state("READY").unwrap(), AgentState::Ready);
        assert!(parse_agent_state("bogus").is_err());
    }
}
