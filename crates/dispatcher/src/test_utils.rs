use chrono::{DateTime, Utc};
use serde_json::json;

use orchestrator_core::models::{Task, TaskPriority};

/// 测试用任务构建器，id 与 name 相同
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: Task::new(id, json!({})).with_id(id),
        }
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.task.created_at = at;
        self
    }

    pub fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.task.scheduled_at = Some(at);
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.task.dependencies = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
