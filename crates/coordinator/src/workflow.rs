//! 顺序工作流状态机
//!
//! ```text
//! pending → running → completed
//!              ↓
//!            failed (某一步失败且未声明 continue_on_failure)
//! ```
//!
//! 只支持顺序串联，同一工作流内不支持并行分支。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

fn default_step_priority() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    /// 经路由表映射到Agent类型
    pub task_type: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_step_priority")]
    pub priority: u8,
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            parameters: Value::Null,
            priority: default_step_priority(),
            continue_on_failure: false,
        }
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// 记录一步结果之后的走向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Next,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub context: Map<String, Value>,
    pub current_step: usize,
    pub status: WorkflowStatus,
    pub results: Vec<StepResult>,
    pub current_task_id: Option<String>,
    pub current_agent: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>, context: Map<String, Value>) -> Self {
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            steps,
            context,
            current_step: 0,
            status: WorkflowStatus::Pending,
            results: Vec::new(),
            current_task_id: None,
            current_agent: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn current(&self) -> Option<&WorkflowStep> {
        self.steps.get(self.current_step)
    }

    /// 当前步骤下发给Agent的任务数据
    pub fn step_task_data(&self) -> Value {
        let step = self.current();
        json!({
            "workflow_id": self.workflow_id,
            "step_index": self.current_step,
            "step": step.map(|s| s.name.clone()),
            "parameters": step.map(|s| s.parameters.clone()).unwrap_or(Value::Null),
            "context": self.context,
            "priority": step.map_or(default_step_priority(), |s| s.priority),
        })
    }

    /// 记录当前步骤的结果并推进
    pub fn record_result(&mut self, result: StepResult) -> StepOutcome {
        let step = self.current().cloned();
        let failed = !result.success && !step.as_ref().is_some_and(|s| s.continue_on_failure);

        if result.success {
            match &result.output {
                Value::Object(output) => {
                    for (key, value) in output {
                        self.context.insert(key.clone(), value.clone());
                    }
                }
                Value::Null => {}
                other => {
                    let key = step
                        .as_ref()
                        .map_or_else(|| format!("step_{}", self.current_step), |s| s.name.clone());
                    self.context.insert(key, other.clone());
                }
            }
        }
        let error = result.error.clone();
        self.results.push(result);
        self.current_task_id = None;
        self.current_agent = None;

        if failed {
            let index = self.current_step;
            self.fail(error.unwrap_or_else(|| format!("步骤 {index} 执行失败")));
            return StepOutcome::Failed;
        }

        self.current_step += 1;
        if self.current_step >= self.steps.len() {
            self.status = WorkflowStatus::Completed;
            self.completed_at = Some(Utc::now());
            StepOutcome::Completed
        } else {
            StepOutcome::Next
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            workflow_id: self.workflow_id.clone(),
            name: self.name.clone(),
            status: self.status,
            current_step: self.current_step,
            total_steps: self.steps.len(),
            current_agent: self.current_agent.clone(),
            context: self.context.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub current_agent: Option<String>,
    pub context: Map<String, Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
