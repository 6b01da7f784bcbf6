use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use orchestrator_core::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// 分配给Agent，由协调器执行
    TaskAssignment,
    /// 调整排队任务的优先级，由调度器执行
    PriorityChange,
    /// 调整Worker池大小，由池管理器执行
    ResourceAllocation,
    Optimization,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::TaskAssignment => "task_assignment",
            DecisionType::PriorityChange => "priority_change",
            DecisionType::ResourceAllocation => "resource_allocation",
            DecisionType::Optimization => "optimization",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_assignment" => Ok(DecisionType::TaskAssignment),
            "priority_change" => Ok(DecisionType::PriorityChange),
            "resource_allocation" => Ok(DecisionType::ResourceAllocation),
            "optimization" => Ok(DecisionType::Optimization),
            other => Err(OrchestratorError::InvalidCommand(format!(
                "未知的决策类型: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Executed,
    Failed,
    Rejected,
}

/// 主控大脑做出的决策
///
/// ```text
/// Pending ──执行成功──→ Executed
///    │ └────执行失败──→ Failed (error 记录原因)
///    └──────人工驳回──→ Rejected
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub decision_type: DecisionType,
    pub target_agents: Vec<String>,
    pub parameters: Value,
    pub reasoning: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub executed: bool,
    pub status: DecisionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Decision {
    /// 置信度被限制在 [0, 1]
    pub fn new(
        decision_type: DecisionType,
        target_agents: Vec<String>,
        parameters: Value,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            decision_type,
            target_agents,
            parameters,
            reasoning: reasoning.into(),
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
            created_at: Utc::now(),
            executed: false,
            status: DecisionStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DecisionStatus::Pending
    }

    pub(crate) fn mark_executed(&mut self, result: Value) {
        self.executed = true;
        self.status = DecisionStatus::Executed;
        self.result = Some(result);
        self.error = None;
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.status = DecisionStatus::Failed;
        self.error = Some(error);
    }

    pub(crate) fn mark_rejected(&mut self, reason: Option<String>) {
        self.status = DecisionStatus::Rejected;
        self.error = reason;
    }

    /// 优先取参数中的 `queue`，否则取第一个目标
    pub fn target_queue(&self) -> Option<String> {
        self.parameters
            .get("queue")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.target_agents.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_is_clamped() {
        let d = Decision::new(DecisionType::Optimization, vec![], json!({}), "x", 1.7);
        assert_eq!(d.confidence, 1.0);
        let d = Decision::new(DecisionType::Optimization, vec![], json!({}), "x", f64::NAN);
        assert_eq!(d.confidence, 0.0);
        assert!(d.is_pending());
    }

    #[test]
    fn test_target_queue_prefers_parameter() {
        let d = Decision::new(
            DecisionType::ResourceAllocation,
            vec!["backend".to_string()],
            json!({"queue": "critical"}),
            "x",
            0.5,
        );
        assert_eq!(d.target_queue().as_deref(), Some("critical"));

        let d = Decision::new(
            DecisionType::ResourceAllocation,
            vec!["backend".to_string()],
            json!({}),
            "x",
            0.5,
        );
        assert_eq!(d.target_queue().as_deref(), Some("backend"));
    }

    #[test]
    fn test_decision_type_round_trips_through_str() {
        for t in [
            DecisionType::TaskAssignment,
            DecisionType::PriorityChange,
            DecisionType::ResourceAllocation,
            DecisionType::Optimization,
        ] {
            assert_eq!(t.as_str().parse::<DecisionType>().unwrap(), t);
        }
        assert!("delegate".parse::<DecisionType>().is_err());
    }
}
