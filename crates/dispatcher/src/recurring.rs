use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use orchestrator_core::{
    models::{Task, TaskPriority},
    OrchestratorError, OrchestratorResult,
};

use crate::scheduler::PriorityScheduler;

pub const JOB_ID_KEY: &str = "_job_id";
pub const RECURRING_KEY: &str = "_recurring";

/// 周期任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJob {
    pub job_id: String,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub interval_seconds: i64,
    pub priority: TaskPriority,
    pub next_run: DateTime<Utc>,
    /// 最近一次入队的任务id
    pub last_task_id: Option<String>,
    pub runs: u64,
}

/// 定时与周期任务
///
/// 周期任务不会自动续期：每次执行完成后由调用方调用
/// [`RecurringScheduler::handle_recurring_completion`] 安排下一次执行。
pub struct RecurringScheduler {
    scheduler: Arc<PriorityScheduler>,
    jobs: RwLock<HashMap<String, RecurringJob>>,
}

impl RecurringScheduler {
    pub fn new(scheduler: Arc<PriorityScheduler>) -> Self {
        Self {
            scheduler,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// 安排一次性任务
    pub async fn schedule_once(
        &self,
        task_name: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        priority: TaskPriority,
    ) -> OrchestratorResult<String> {
        let task = Task::new(task_name, payload)
            .with_priority(priority)
            .with_scheduled_at(run_at);
        self.scheduler.enqueue(task).await
    }

    /// 安排周期任务，返回 job id
    pub async fn schedule_recurring(
        &self,
        task_name: &str,
        payload: serde_json::Value,
        interval: Duration,
        priority: TaskPriority,
        start_at: Option<DateTime<Utc>>,
    ) -> OrchestratorResult<String> {
        if interval <= Duration::zero() {
            return Err(OrchestratorError::InvalidCommand(format!(
                "周期任务间隔必须大于0: {task_name}"
            )));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let mut job = RecurringJob {
            job_id: job_id.clone(),
            task_name: task_name.to_string(),
            payload,
            interval_seconds: interval.num_seconds(),
            priority,
            next_run: start_at.unwrap_or_else(Utc::now),
            last_task_id: None,
            runs: 0,
        };

        let task_id = self.enqueue_run(&job).await?;
        job.last_task_id = Some(task_id);
        info!(
            "周期任务 {} ({}) 已创建，间隔 {} 秒",
            job_id, task_name, job.interval_seconds
        );
        self.jobs.write().await.insert(job_id.clone(), job);
        Ok(job_id)
    }

    async fn enqueue_run(&self, job: &RecurringJob) -> OrchestratorResult<String> {
        let task = Task::new(&job.task_name, tagged_payload(&job.payload, &job.job_id))
            .with_priority(job.priority)
            .with_scheduled_at(job.next_run);
        self.scheduler.enqueue(task).await
    }

    /// 取消周期任务，同时取消尚未出队的下一次执行
    pub async fn cancel_recurring(&self, job_id: &str) -> bool {
        let Some(job) = self.jobs.write().await.remove(job_id) else {
            return false;
        };
        if let Some(task_id) = &job.last_task_id {
            self.scheduler.cancel(task_id).await;
        }
        info!("周期任务 {} 已取消", job_id);
        true
    }

    /// 一次执行完成后安排下一次，返回新任务id；job 已取消时返回 None
    pub async fn handle_recurring_completion(
        &self,
        job_id: &str,
    ) -> OrchestratorResult<Option<String>> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            warn!("周期任务 {} 不存在，忽略完成通知", job_id);
            return Ok(None);
        };

        job.next_run = Utc::now() + Duration::seconds(job.interval_seconds);
        job.runs += 1;
        let snapshot = job.clone();
        drop(jobs);

        let task_id = self.enqueue_run(&snapshot).await?;
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            job.last_task_id = Some(task_id.clone());
        }
        Ok(Some(task_id))
    }

    pub async fn get_job(&self, job_id: &str) -> Option<RecurringJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<RecurringJob> {
        let mut jobs: Vec<RecurringJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.next_run);
        jobs
    }
}

/// 周期任务所属的 job id
pub fn job_id_of(task: &Task) -> Option<&str> {
    let recurring = task.payload.get(RECURRING_KEY)?.as_bool()?;
    if !recurring {
        return None;
    }
    task.payload.get(JOB_ID_KEY)?.as_str()
}

fn tagged_payload(payload: &serde_json::Value, job_id: &str) -> serde_json::Value {
    let mut object = match payload {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    object.insert(JOB_ID_KEY.to_string(), serde_json::Value::from(job_id));
    object.insert(RECURRING_KEY.to_string(), serde_json::Value::Bool(true));
    serde_json::Value::Object(object)
}
