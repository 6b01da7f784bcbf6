use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::OrchestratorResult;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error};

/// 协调器事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorEventType {
    AgentRegistered,
    AgentUnregistered,
    AgentStateChanged,
    AgentUnhealthy,
    TaskAssigned,
    TaskCompleted,
    WorkflowCompleted,
    WorkflowFailed,
}

impl CoordinatorEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorEventType::AgentRegistered => "agent_registered",
            CoordinatorEventType::AgentUnregistered => "agent_unregistered",
            CoordinatorEventType::AgentStateChanged => "agent_state_changed",
            CoordinatorEventType::AgentUnhealthy => "agent_unhealthy",
            CoordinatorEventType::TaskAssigned => "task_assigned",
            CoordinatorEventType::TaskCompleted => "task_completed",
            CoordinatorEventType::WorkflowCompleted => "workflow_completed",
            CoordinatorEventType::WorkflowFailed => "workflow_failed",
        }
    }
}

impl fmt::Display for CoordinatorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorEvent {
    pub event_type: CoordinatorEventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl CoordinatorEvent {
    pub fn new(event_type: CoordinatorEventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// 事件处理器，返回错误只会被记录
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &CoordinatorEvent) -> OrchestratorResult<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&CoordinatorEvent) -> OrchestratorResult<()> + Send + Sync,
{
    fn handle(&self, event: &CoordinatorEvent) -> OrchestratorResult<()> {
        self(event)
    }
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<CoordinatorEventType, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, event_type: CoordinatorEventType, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// 依次调用所有处理器，单个处理器失败不影响其余处理器；返回失败数
    pub async fn emit(&self, event: CoordinatorEvent) -> usize {
        let handlers = {
            let handlers = self.handlers.read().await;
            handlers.get(&event.event_type).cloned().unwrap_or_default()
        };
        debug!("触发事件: {} ({} 个处理器)", event.event_type, handlers.len());

        let mut failures = 0;
        for handler in handlers {
            if let Err(e) = handler.handle(&event) {
                failures += 1;
                error!("事件处理器执行失败: {}: {}", event.event_type, e);
            }
        }
        failures
    }
}
