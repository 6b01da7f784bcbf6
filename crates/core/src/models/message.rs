use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentType;

/// Agent间消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Event,
    TaskAssignment,
}

/// 消息接收方
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    /// 指定的Agent
    Agent(String),
    /// 某一类型的所有Agent
    AgentType(AgentType),
    /// 除发送方外的所有Agent
    Broadcast,
}

impl Recipient {
    /// 解析字符串形式的接收方："broadcast"、Agent类型名或具体的Agent ID
    pub fn parse(value: &str) -> Self {
        if value == "broadcast" {
            return Recipient::Broadcast;
        }
        match value.parse::<AgentType>() {
            Ok(agent_type) => Recipient::AgentType(agent_type),
            Err(_) => Recipient::Agent(value.to_string()),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Agent(id) => f.write_str(id),
            Recipient::AgentType(agent_type) => write!(f, "{agent_type}"),
            Recipient::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// 投递到Agent收件箱中的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    /// 实际投递的Agent ID
    pub recipient_id: String,
    pub message_type: MessageType,
    pub content: serde_json::Value,
    pub correlation_id: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => (now - self.timestamp).num_milliseconds() >= (ttl as i64) * 1000,
            None => false,
        }
    }
}
