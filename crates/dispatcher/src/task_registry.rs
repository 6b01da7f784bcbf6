//! 任务执行登记
//!
//! 记录每个任务id的执行过程，并按任务名累计成功、失败与重试次数。
//! 已结束的记录可按完成时间清理，累计统计不受清理影响。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use orchestrator_infrastructure::MetricsCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Started,
    Success,
    Failure,
    Retry,
    Revoked,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Started => "started",
            ExecutionState::Success => "success",
            ExecutionState::Failure => "failure",
            ExecutionState::Retry => "retry",
            ExecutionState::Revoked => "revoked",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutionState::Success | ExecutionState::Failure | ExecutionState::Revoked
        )
    }
}

/// 单个任务id的执行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: String,
    pub task_name: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    /// 执行该任务的Agent或Worker
    pub executor_id: Option<String>,
    pub queue: Option<String>,
}

impl TaskExecution {
    pub fn duration_seconds(&self) -> Option<f64> {
        let finished = self.finished_at?;
        Some((finished - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// 按任务名累计的执行统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskNameStats {
    pub total_runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub total_duration_seconds: f64,
    pub last_run: Option<DateTime<Utc>>,
}

impl TaskNameStats {
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_runs > 0).then(|| self.successes as f64 / self.total_runs as f64)
    }

    pub fn avg_duration_seconds(&self) -> Option<f64> {
        (self.total_runs > 0).then(|| self.total_duration_seconds / self.total_runs as f64)
    }
}

/// 执行记录查询条件
#[derive(Debug, Clone)]
pub struct ExecutionFilter {
    pub task_name: Option<String>,
    pub state: Option<ExecutionState>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            task_name: None,
            state: None,
            since: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    executions: HashMap<String, TaskExecution>,
    stats: BTreeMap<String, TaskNameStats>,
}

#[derive(Default)]
pub struct TaskRegistry {
    state: RwLock<RegistryState>,
    metrics: MetricsCollector,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一次执行；同一任务id重试后再次开始时保留重试次数
    pub async fn record_start(
        &self,
        task_id: &str,
        task_name: &str,
        executor_id: Option<&str>,
        queue: Option<&str>,
    ) {
        let mut state = self.state.write().await;
        let retry_count = state.executions.get(task_id).map_or(0, |e| e.retry_count);
        state.executions.insert(
            task_id.to_string(),
            TaskExecution {
                task_id: task_id.to_string(),
                task_name: task_name.to_string(),
                state: ExecutionState::Started,
                started_at: Utc::now(),
                finished_at: None,
                result: None,
                error: None,
                retry_count,
                executor_id: executor_id.map(str::to_string),
                queue: queue.map(str::to_string),
            },
        );
        debug!("任务 {} ({}) 开始执行", task_id, task_name);
    }

    /// 记录成功，未登记开始的任务id返回 false
    pub async fn record_success(&self, task_id: &str, result: Option<Value>) -> bool {
        self.finish(task_id, ExecutionState::Success, result, None).await
    }

    pub async fn record_failure(&self, task_id: &str, error: impl Into<String>) -> bool {
        self.finish(task_id, ExecutionState::Failure, None, Some(error.into()))
            .await
    }

    /// 任务在开始前或执行中被取消
    pub async fn record_revoked(&self, task_id: &str) -> bool {
        self.finish(task_id, ExecutionState::Revoked, None, None).await
    }

    async fn finish(
        &self,
        task_id: &str,
        outcome: ExecutionState,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let mut state = self.state.write().await;
        let RegistryState { executions, stats } = &mut *state;
        let Some(execution) = executions.get_mut(task_id) else {
            return false;
        };
        let now = Utc::now();
        execution.state = outcome;
        execution.finished_at = Some(now);
        if result.is_some() {
            execution.result = result;
        }
        if error.is_some() {
            execution.error = error;
        }

        if outcome != ExecutionState::Revoked {
            let duration = execution.duration_seconds().unwrap_or(0.0);
            let entry = stats.entry(execution.task_name.clone()).or_default();
            entry.total_runs += 1;
            entry.last_run = Some(now);
            if outcome == ExecutionState::Success {
                entry.successes += 1;
                entry.total_duration_seconds += duration;
                self.metrics.record_task_duration(&execution.task_name, duration);
            } else {
                entry.failures += 1;
            }
        }
        self.metrics
            .record_task_execution(&execution.task_name, outcome.as_str());
        true
    }

    /// 记录一次重试；记录回到重试状态，等待下一次开始
    pub async fn record_retry(&self, task_id: &str, error: impl Into<String>) -> bool {
        let mut state = self.state.write().await;
        let RegistryState { executions, stats } = &mut *state;
        let Some(execution) = executions.get_mut(task_id) else {
            return false;
        };
        execution.state = ExecutionState::Retry;
        execution.retry_count += 1;
        execution.error = Some(error.into());
        stats.entry(execution.task_name.clone()).or_default().retries += 1;
        self.metrics
            .record_task_execution(&execution.task_name, ExecutionState::Retry.as_str());
        true
    }

    pub async fn get_execution(&self, task_id: &str) -> Option<TaskExecution> {
        self.state.read().await.executions.get(task_id).cloned()
    }

    /// 符合条件的执行记录，按开始时间新的在前
    pub async fn get_executions(&self, filter: &ExecutionFilter) -> Vec<TaskExecution> {
        let state = self.state.read().await;
        let mut executions: Vec<TaskExecution> = state
            .executions
            .values()
            .filter(|e| filter.task_name.as_deref().map_or(true, |n| e.task_name == n))
            .filter(|e| filter.state.map_or(true, |s| e.state == s))
            .filter(|e| filter.since.map_or(true, |since| e.started_at >= since))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(filter.limit);
        executions
    }

    pub async fn get_stats(&self, task_name: Option<&str>) -> BTreeMap<String, TaskNameStats> {
        let state = self.state.read().await;
        match task_name {
            Some(name) => state
                .stats
                .get(name)
                .map(|s| BTreeMap::from([(name.to_string(), s.clone())]))
                .unwrap_or_default(),
            None => state.stats.clone(),
        }
    }

    pub async fn reset_stats(&self, task_name: Option<&str>) {
        let mut state = self.state.write().await;
        match task_name {
            Some(name) => {
                state.stats.remove(name);
            }
            None => state.stats.clear(),
        }
    }

    /// 删除完成时间早于 `older_than` 之前的记录，返回删除数量；未结束的记录保留
    pub async fn cleanup_old_executions(&self, older_than: Duration) -> usize {
        self.cleanup_before(Utc::now() - older_than).await
    }

    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let before = state.executions.len();
        state
            .executions
            .retain(|_, e| e.finished_at.map_or(true, |finished| finished >= cutoff));
        let removed = before - state.executions.len();
        if removed > 0 {
            info!("清理了 {} 条过期的执行记录", removed);
        }
        removed
    }

    pub async fn execution_count(&self) -> usize {
        self.state.read().await.executions.len()
    }
}
