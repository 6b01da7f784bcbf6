use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Agent类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Frontend,
    Backend,
    Database,
    Devops,
    Qa,
    Uiux,
    Security,
    Aiml,
    ProjectManager,
}

impl AgentType {
    pub const ALL: [AgentType; 9] = [
        AgentType::Frontend,
        AgentType::Backend,
        AgentType::Database,
        AgentType::Devops,
        AgentType::Qa,
        AgentType::Uiux,
        AgentType::Security,
        AgentType::Aiml,
        AgentType::ProjectManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Frontend => "frontend",
            AgentType::Backend => "backend",
            AgentType::Database => "database",
            AgentType::Devops => "devops",
            AgentType::Qa => "qa",
            AgentType::Uiux => "uiux",
            AgentType::Security => "security",
            AgentType::Aiml => "aiml",
            AgentType::ProjectManager => "project_manager",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("未知的Agent类型: {s}")))
    }
}

/// Agent运行状态
///
/// ```text
/// OFFLINE → STARTING → READY ⇄ BUSY
///                        ↓
///                      ERROR (心跳超时，不会自动恢复)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Offline,
    Starting,
    Ready,
    Busy,
    Error,
    Stopping,
}

impl AgentState {
    pub const ALL: [AgentState; 6] = [
        AgentState::Offline,
        AgentState::Starting,
        AgentState::Ready,
        AgentState::Busy,
        AgentState::Error,
        AgentState::Stopping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Offline => "offline",
            AgentState::Starting => "starting",
            AgentState::Ready => "ready",
            AgentState::Busy => "busy",
            AgentState::Error => "error",
            AgentState::Stopping => "stopping",
        }
    }
}

/// 已注册Agent的信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub state: AgentState,
    pub capabilities: Vec<String>,
    pub current_task: Option<String>,
    pub task_count: u64,
    pub error_count: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AgentInfo {
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType, capabilities: Vec<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type,
            state: AgentState::Starting,
            capabilities,
            current_task: None,
            task_count: 0,
            error_count: 0,
            last_heartbeat: None,
            registered_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }
}
