use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// 任务优先级
///
/// 五个固定的优先级档位，既用于出队排序，也用于持久化镜像的分区键
/// (`queue:<band>`)。数值越大越优先。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Background,
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Low,
        TaskPriority::Background,
    ];

    /// 优先级数值
    pub fn value(&self) -> u8 {
        match self {
            TaskPriority::Critical => 10,
            TaskPriority::High => 7,
            TaskPriority::Medium => 5,
            TaskPriority::Low => 3,
            TaskPriority::Background => 1,
        }
    }

    /// 根据精确数值获取优先级
    pub fn from_value(value: u8) -> Result<Self, OrchestratorError> {
        match value {
            10 => Ok(TaskPriority::Critical),
            7 => Ok(TaskPriority::High),
            5 => Ok(TaskPriority::Medium),
            3 => Ok(TaskPriority::Low),
            1 => Ok(TaskPriority::Background),
            other => Err(OrchestratorError::InvalidPriority(other)),
        }
    }

    /// 将任意数值归入最接近的不高于它的档位
    pub fn nearest(value: i64) -> Self {
        match value {
            v if v >= 10 => TaskPriority::Critical,
            v if v >= 7 => TaskPriority::High,
            v if v >= 5 => TaskPriority::Medium,
            v if v >= 3 => TaskPriority::Low,
            _ => TaskPriority::Background,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
            TaskPriority::Background => "background",
        }
    }

    /// 持久化镜像中的有序集合键名
    pub fn band_key(&self) -> String {
        format!("queue:{}", self.as_str())
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = OrchestratorError;

    /// 既接受名称 ("high")，也接受数值 ("7")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            "background" => Ok(TaskPriority::Background),
            other => other
                .parse::<u8>()
                .map_err(|_| OrchestratorError::InvalidCommand(format!("无效的优先级: {s}")))
                .and_then(TaskPriority::from_value),
        }
    }
}

/// 任务定义
///
/// 一个任务在 `dependencies` 中的每个 id 都被标记完成、并且
/// `scheduled_at`（若设置）不晚于当前时间时，才算"就绪"。
///
/// 生命周期：
///
/// ```text
/// 提交 → 就绪队列 / 等待依赖 → 被Worker取出 → 完成 / 失败
///                                              ↓
///                                    退避后重新入队 → 死信 (超过 max_retries)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    /// 创建新任务，默认 MEDIUM 优先级、最多重试3次
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            priority: TaskPriority::Medium,
            payload,
            created_at: Utc::now(),
            scheduled_at: None,
            deadline: None,
            dependencies: BTreeSet::new(),
            retry_count: 0,
            max_retries: default_max_retries(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// 时间门控：`scheduled_at` 未到的任务不可见
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }

    /// 截止时间前剩余秒数，没有截止时间时返回 None
    pub fn seconds_until_deadline(&self, now: DateTime<Utc>) -> Option<f64> {
        self.deadline
            .map(|deadline| (deadline - now).num_milliseconds() as f64 / 1000.0)
    }
}

/// 外部任务提交请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub max_retries: Option<u32>,
}

impl TaskSubmission {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            ..Default::default()
        }
    }

    pub fn into_task(self, default_max_retries: u32) -> Task {
        let mut task = Task::new(self.name, self.payload)
            .with_priority(self.priority)
            .with_dependencies(self.dependencies)
            .with_max_retries(self.max_retries.unwrap_or(default_max_retries));
        task.scheduled_at = self.scheduled_at;
        task.deadline = self.deadline;
        task.metadata = self.metadata;
        task
    }
}

/// 调度器视角下的任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 已就绪，等待出队
    Queued,
    /// 已入队但 `scheduled_at` 未到
    Scheduled,
    /// 等待依赖完成
    Blocked,
    Completed,
    DeadLettered,
}

/// 死信记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: Task,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_priority_ordering_and_values() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Low > TaskPriority::Background);
        assert_eq!(TaskPriority::Critical.value(), 10);
        assert_eq!(TaskPriority::Background.value(), 1);
        assert_eq!(TaskPriority::High.band_key(), "queue:high");
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert_eq!("3".parse::<TaskPriority>().unwrap(), TaskPriority::Low);
        assert!("4".parse::<TaskPriority>().is_err());
        assert!("urgent".parse::<TaskPriority>().is_err());
        assert_eq!(TaskPriority::nearest(8), TaskPriority::High);
        assert_eq!(TaskPriority::nearest(0), TaskPriority::Background);
    }

    #[test]
    fn test_task_due_gate() {
        let now = Utc::now();
        let task = Task::new("t", json!({}));
        assert!(task.is_due(now));

        let future = task.clone().with_scheduled_at(now + Duration::seconds(30));
        assert!(!future.is_due(now));
        assert!(future.is_due(now + Duration::seconds(30)));
    }

    #[test]
    fn test_submission_into_task() {
        let mut submission = TaskSubmission::new("build_api", json!({"x": 1}));
        submission.priority = TaskPriority::High;
        submission.dependencies = vec!["a".to_string(), "b".to_string()];

        let task = submission.into_task(5);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.dependencies.len(), 2);
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn test_task_serialization_is_stable() {
        let task = Task::new("t", json!({"b": 1, "a": 2}))
            .with_metadata("z", json!(1))
            .with_metadata("a", json!(2));
        let first = serde_json::to_string(&task).unwrap();
        let decoded: Task = serde_json::from_str(&first).unwrap();
        assert_eq!(serde_json::to_string(&decoded).unwrap(), first);
    }
}
