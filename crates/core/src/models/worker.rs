use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Starting,
    Stopping,
    Stopped,
    Error,
}

impl WorkerStatus {
    /// IDLE 与 BUSY 计入活跃Worker
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Busy)
    }
}

/// Worker记录
///
/// 只保存簿记信息；进程句柄由 `WorkerPoolManager` 单独持有。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub queue: String,
    pub status: WorkerStatus,
    pub process_id: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub current_task: Option<String>,
    pub hostname: String,
    pub concurrency: u32,
}

impl WorkerRecord {
    pub fn new(worker_id: impl Into<String>, queue: impl Into<String>, concurrency: u32) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue: queue.into(),
            status: WorkerStatus::Starting,
            process_id: None,
            started_at: None,
            tasks_processed: 0,
            tasks_failed: 0,
            current_task: None,
            hostname: local_hostname(),
            concurrency,
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// 单个Worker池的统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub min_workers: usize,
    pub max_workers: usize,
    pub active_workers: usize,
    pub busy_workers: usize,
    pub utilization: f64,
    pub workers: Vec<WorkerRecord>,
}

/// 全部Worker池的统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_workers: usize,
    pub active_workers: usize,
    pub busy_workers: usize,
    pub pools: std::collections::BTreeMap<String, PoolStats>,
}
