use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent上报给主控大脑的消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageKind {
    Log,
    Metric,
    Request,
    Result,
    Error,
    Notification,
}

impl AgentMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMessageKind::Log => "log",
            AgentMessageKind::Metric => "metric",
            AgentMessageKind::Request => "request",
            AgentMessageKind::Result => "result",
            AgentMessageKind::Error => "error",
            AgentMessageKind::Notification => "notification",
        }
    }
}

impl fmt::Display for AgentMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMessageKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(AgentMessageKind::Log),
            "metric" => Ok(AgentMessageKind::Metric),
            "request" => Ok(AgentMessageKind::Request),
            "result" => Ok(AgentMessageKind::Result),
            "error" => Ok(AgentMessageKind::Error),
            "notification" => Ok(AgentMessageKind::Notification),
            other => Err(OrchestratorError::InvalidCommand(format!(
                "未知的消息类型: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub agent_id: String,
    /// 不限于 [`orchestrator_core::AgentType`]，控制面等外部来源也会上报
    pub agent_type: String,
    pub message_type: AgentMessageKind,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    pub priority: u8,
    pub correlation_id: Option<String>,
}

impl AgentMessage {
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        message_type: AgentMessageKind,
        content: Value,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            message_type,
            content,
            timestamp: Utc::now(),
            priority: 5,
            correlation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn content_f64(&self, key: &str) -> Option<f64> {
        self.content.get(key).and_then(Value::as_f64)
    }
}

/// 按消息类型注册的处理器，返回错误只会被记录
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &AgentMessage) -> OrchestratorResult<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&AgentMessage) -> OrchestratorResult<()> + Send + Sync,
{
    fn handle(&self, message: &AgentMessage) -> OrchestratorResult<()> {
        self(message)
    }
}

/// 主控大脑视角下的Agent记录，来源于收到的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedAgent {
    pub agent_type: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
    pub last_message_type: AgentMessageKind,
}
