use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_core::{
    config::{PoolConfig, WorkerPoolConfig},
    OrchestratorError, OrchestratorResult, ProcessLauncher, ProcessSignal, WorkerProcess,
    WorkerRecord, WorkerSpawnSpec, WorkerStats, WorkerStatus,
};
use orchestrator_infrastructure::MetricsCollector;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::pool::WorkerPool;

/// 单个Worker的存活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLiveness {
    pub status: WorkerStatus,
    pub process_running: bool,
}

/// Worker池管理器
///
/// 池表与进程句柄表分别加锁；停止Worker时先取出句柄再等待进程退出，
/// 等待期间不持有任何锁。
pub struct WorkerPoolManager {
    launcher: Arc<dyn ProcessLauncher>,
    config: WorkerPoolConfig,
    pools: RwLock<BTreeMap<String, WorkerPool>>,
    processes: Mutex<HashMap<String, Box<dyn WorkerProcess>>>,
    metrics: MetricsCollector,
}

impl WorkerPoolManager {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: Option<WorkerPoolConfig>) -> Self {
        let config = config.unwrap_or_default();
        let pools = config
            .pools
            .iter()
            .map(|pool| (pool.queue.clone(), WorkerPool::new(pool.clone())))
            .collect();

        Self {
            launcher,
            config,
            pools: RwLock::new(pools),
            processes: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// 启动一个Worker，池已满时返回 `None`
    pub async fn start_worker(
        &self,
        queue: &str,
        concurrency: Option<u32>,
    ) -> OrchestratorResult<Option<WorkerRecord>> {
        let worker_id = format!("{}-{}", queue, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        self.start_worker_with_id(queue, concurrency, worker_id).await
    }

    async fn start_worker_with_id(
        &self,
        queue: &str,
        concurrency: Option<u32>,
        worker_id: String,
    ) -> OrchestratorResult<Option<WorkerRecord>> {
        let concurrency = concurrency.unwrap_or(self.config.default_concurrency);

        // 先以STARTING占位，保证并发启动时不会超过max_workers
        {
            let mut pools = self.pools.write().await;
            let pool = pools
                .entry(queue.to_string())
                .or_insert_with(|| WorkerPool::lazy(queue));
            if !pool.has_capacity() {
                debug!("Worker池已满: queue={}, max={}", queue, pool.config.max_workers);
                return Ok(None);
            }
            pool.workers.insert(
                worker_id.clone(),
                WorkerRecord::new(worker_id.clone(), queue, concurrency),
            );
        }

        let spec = WorkerSpawnSpec {
            worker_id: worker_id.clone(),
            queue: queue.to_string(),
            concurrency,
        };

        match self.launcher.spawn(&spec).await {
            Ok(process) => {
                let pid = process.pid();
                self.processes.lock().await.insert(worker_id.clone(), process);

                let record = {
                    let mut pools = self.pools.write().await;
                    let record = pools
                        .get_mut(queue)
                        .and_then(|pool| pool.workers.get_mut(&worker_id))
                        .ok_or_else(|| OrchestratorError::WorkerNotFound {
                            id: worker_id.clone(),
                        })?;
                    record.status = WorkerStatus::Idle;
                    record.process_id = pid;
                    record.started_at = Some(Utc::now());
                    record.clone()
                };

                info!("Worker已启动: {} (queue={}, pid={:?})", worker_id, queue, pid);
                self.publish_counts().await;
                Ok(Some(record))
            }
            Err(e) => {
                error!("启动Worker失败: {}: {}", worker_id, e);
                if let Some(pool) = self.pools.write().await.get_mut(queue) {
                    pool.workers.remove(&worker_id);
                }
                Err(e)
            }
        }
    }

    /// 停止Worker
    ///
    /// graceful 时先发 SIGTERM 并等待 `graceful_stop_timeout_seconds`，超时后 SIGKILL；
    /// 否则直接 SIGKILL。返回 false 表示该Worker没有运行中的进程。
    pub async fn stop_worker(&self, worker_id: &str, graceful: bool) -> OrchestratorResult<bool> {
        let Some(mut process) = self.processes.lock().await.remove(worker_id) else {
            return Ok(false);
        };

        let queue = self
            .set_status(worker_id, WorkerStatus::Stopping)
            .await
            .map(|record| record.queue);

        info!("停止Worker: {} (graceful={})", worker_id, graceful);
        let outcome = self.terminate(worker_id, process.as_mut(), graceful).await;

        if let Some(queue) = queue {
            if let Some(pool) = self.pools.write().await.get_mut(&queue) {
                pool.workers.remove(worker_id);
            }
        }
        self.publish_counts().await;

        outcome.map(|_| true)
    }

    async fn terminate(
        &self,
        worker_id: &str,
        process: &mut dyn WorkerProcess,
        graceful: bool,
    ) -> OrchestratorResult<()> {
        if graceful {
            process.signal(ProcessSignal::Terminate).await?;
            let grace = Duration::from_secs(self.config.graceful_stop_timeout_seconds);
            match timeout(grace, process.wait()).await {
                Ok(Ok(exit)) => {
                    debug!("Worker {} 已退出: {:?}", worker_id, exit.code);
                    return Ok(());
                }
                Ok(Err(e)) => warn!("等待Worker {} 退出失败: {}", worker_id, e),
                Err(_) => warn!("Worker {} 在 {:?} 内未退出，强制终止", worker_id, grace),
            }
        }

        process.signal(ProcessSignal::Kill).await?;
        if let Err(e) = process.wait().await {
            warn!("回收Worker {} 进程失败: {}", worker_id, e);
        }
        Ok(())
    }

    /// 停止所有Worker，返回实际停止的数量
    pub async fn stop_all_workers(&self, graceful: bool) -> usize {
        let worker_ids: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        let mut stopped = 0;
        for worker_id in worker_ids {
            match self.stop_worker(&worker_id, graceful).await {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => error!("停止Worker {} 失败: {}", worker_id, e),
            }
        }
        info!("已停止 {} 个Worker", stopped);
        stopped
    }

    /// 调整池大小，目标值先被限制到 [min_workers, max_workers]
    ///
    /// 返回新启动的Worker。缩容时优先停止IDLE Worker，BUSY Worker只会被优雅停止。
    pub async fn scale_pool(&self, queue: &str, target: usize) -> OrchestratorResult<Vec<WorkerRecord>> {
        let (current, target, candidates) = {
            let pools = self.pools.read().await;
            let pool = pools.get(queue).ok_or_else(|| OrchestratorError::PoolNotFound {
                queue: queue.to_string(),
            })?;
            (
                pool.active_workers(),
                pool.clamp_target(target),
                pool.stop_candidates(),
            )
        };

        let mut started = Vec::new();
        if target > current {
            info!("扩容Worker池: {} {} -> {}", queue, current, target);
            for _ in current..target {
                match self.start_worker(queue, None).await {
                    Ok(Some(record)) => started.push(record),
                    Ok(None) => break,
                    Err(e) => error!("扩容时启动Worker失败: {}", e),
                }
            }
        } else if target < current {
            info!("缩容Worker池: {} {} -> {}", queue, current, target);
            let mut remaining = current - target;
            for worker_id in candidates {
                if remaining == 0 {
                    break;
                }
                match self.stop_worker(&worker_id, true).await {
                    Ok(true) => remaining -= 1,
                    Ok(false) => {}
                    Err(e) => error!("缩容时停止Worker {} 失败: {}", worker_id, e),
                }
            }
        }
        Ok(started)
    }

    /// 按利用率对每个池扩容或缩容一个Worker，跳过已暂停的池
    pub async fn auto_scale(&self) {
        let targets: Vec<(String, usize)> = {
            let pools = self.pools.read().await;
            pools
                .iter()
                .filter_map(|(queue, pool)| pool.auto_scale_target().map(|t| (queue.clone(), t)))
                .collect()
        };

        for (queue, target) in targets {
            if let Err(e) = self.scale_pool(&queue, target).await {
                error!("自动扩缩容失败: {}: {}", queue, e);
            }
        }
    }

    /// 用相同的队列、并发数与ID重启Worker
    pub async fn restart_worker(&self, worker_id: &str) -> OrchestratorResult<Option<WorkerRecord>> {
        let record = self
            .get_worker(worker_id)
            .await
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;

        if !self.stop_worker(worker_id, true).await? {
            // 进程已退出，只剩簿记记录
            if let Some(pool) = self.pools.write().await.get_mut(&record.queue) {
                pool.workers.remove(worker_id);
            }
        }

        info!("重启Worker: {}", worker_id);
        let restarted = self
            .start_worker_with_id(&record.queue, Some(record.concurrency), worker_id.to_string())
            .await?;
        if restarted.is_some() {
            self.metrics.record_worker_restart();
        }
        Ok(restarted)
    }

    /// 修改池配置，池不存在时创建
    pub async fn set_pool_config(
        &self,
        queue: &str,
        min_workers: Option<usize>,
        max_workers: Option<usize>,
        scale_up_threshold: Option<f64>,
        scale_down_threshold: Option<f64>,
    ) -> OrchestratorResult<PoolConfig> {
        let mut pools = self.pools.write().await;
        let pool = pools
            .entry(queue.to_string())
            .or_insert_with(|| WorkerPool::lazy(queue));

        let mut config = pool.config.clone();
        if let Some(min) = min_workers {
            config.min_workers = min;
        }
        if let Some(max) = max_workers {
            config.max_workers = max;
        }
        if let Some(up) = scale_up_threshold {
            config.scale_up_threshold = up;
        }
        if let Some(down) = scale_down_threshold {
            config.scale_down_threshold = down;
        }
        config
            .validate()
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))?;

        pool.config = config.clone();
        info!(
            "Worker池配置已更新: {} [{}, {}] up={} down={}",
            queue,
            config.min_workers,
            config.max_workers,
            config.scale_up_threshold,
            config.scale_down_threshold
        );
        Ok(config)
    }

    /// 轮询所有进程，已退出的Worker标记为STOPPED（非零退出码标记为ERROR）
    pub async fn refresh_worker_status(&self) -> Vec<String> {
        let mut exited = Vec::new();
        {
            let mut processes = self.processes.lock().await;
            processes.retain(|worker_id, process| match process.try_wait() {
                Ok(Some(exit)) => {
                    exited.push((worker_id.clone(), exit.code));
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("查询Worker {} 进程状态失败: {}", worker_id, e);
                    true
                }
            });
        }

        let mut ids = Vec::with_capacity(exited.len());
        if !exited.is_empty() {
            let mut pools = self.pools.write().await;
            for (worker_id, code) in exited {
                warn!("Worker进程已退出: {} (code={:?})", worker_id, code);
                if let Some(record) = pools
                    .values_mut()
                    .find_map(|pool| pool.workers.get_mut(&worker_id))
                {
                    record.status = match code {
                        Some(code) if code != 0 => WorkerStatus::Error,
                        _ => WorkerStatus::Stopped,
                    };
                    record.process_id = None;
                    record.current_task = None;
                }
                ids.push(worker_id);
            }
            for (queue, pool) in pools.iter_mut() {
                let pruned = pool.prune_dead_records();
                if !pruned.is_empty() {
                    debug!("清理已退出的Worker记录: {} {:?}", queue, pruned);
                }
            }
        }
        self.publish_counts().await;
        ids
    }

    /// 暂停队列的自动扩缩容，返回 false 表示池不存在
    pub async fn suspend_pool(&self, queue: &str) -> bool {
        self.set_suspended(queue, true).await
    }

    pub async fn resume_pool(&self, queue: &str) -> bool {
        self.set_suspended(queue, false).await
    }

    pub async fn is_suspended(&self, queue: &str) -> bool {
        self.pools
            .read()
            .await
            .get(queue)
            .is_some_and(|pool| pool.suspended)
    }

    async fn set_suspended(&self, queue: &str, suspended: bool) -> bool {
        let mut pools = self.pools.write().await;
        let Some(pool) = pools.get_mut(queue) else {
            return false;
        };
        if pool.suspended != suspended {
            pool.suspended = suspended;
            if suspended {
                warn!("Worker池已暂停自动扩缩容: {}", queue);
            } else {
                info!("Worker池恢复自动扩缩容: {}", queue);
            }
        }
        true
    }

    /// 标记Worker开始执行任务
    pub async fn mark_worker_busy(&self, worker_id: &str, task_id: &str) -> OrchestratorResult<()> {
        let mut pools = self.pools.write().await;
        let record = find_record_mut(&mut pools, worker_id)?;
        record.status = WorkerStatus::Busy;
        record.current_task = Some(task_id.to_string());
        Ok(())
    }

    /// 标记Worker任务结束
    pub async fn mark_worker_idle(&self, worker_id: &str, success: bool) -> OrchestratorResult<()> {
        let mut pools = self.pools.write().await;
        let record = find_record_mut(&mut pools, worker_id)?;
        record.status = WorkerStatus::Idle;
        record.current_task = None;
        record.tasks_processed += 1;
        if !success {
            record.tasks_failed += 1;
        }
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<WorkerRecord> {
        let pools = self.pools.read().await;
        pools
            .values()
            .find_map(|pool| pool.workers.get(worker_id))
            .cloned()
    }

    /// 所有池中的Worker ID
    pub async fn worker_ids(&self) -> Vec<String> {
        let pools = self.pools.read().await;
        pools
            .values()
            .flat_map(|pool| pool.workers.keys().cloned())
            .collect()
    }

    /// Worker不存在时返回 `None`
    pub async fn worker_liveness(&self, worker_id: &str) -> Option<WorkerLiveness> {
        let status = self.get_worker(worker_id).await?.status;
        let process_running = match self.processes.lock().await.get_mut(worker_id) {
            Some(process) => matches!(process.try_wait(), Ok(None)),
            None => false,
        };
        Some(WorkerLiveness {
            status,
            process_running,
        })
    }

    pub async fn get_worker_stats(&self, queue: Option<&str>) -> WorkerStats {
        let pools = self.pools.read().await;
        let mut stats = WorkerStats::default();
        for (name, pool) in pools.iter() {
            if queue.is_some_and(|q| q != name.as_str()) {
                continue;
            }
            stats.total_workers += pool.workers.len();
            stats.active_workers += pool.active_workers();
            stats.busy_workers += pool.busy_workers();
            stats.pools.insert(name.clone(), pool.stats());
        }
        stats
    }

    pub async fn pool_config(&self, queue: &str) -> Option<PoolConfig> {
        self.pools.read().await.get(queue).map(|p| p.config.clone())
    }

    /// 启动周期性的状态刷新与自动扩缩容
    pub fn start_monitoring(
        self: &Arc<Self>,
        interval_duration: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            info!("Worker池监控已启动，间隔 {:?}", interval_duration);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.refresh_worker_status().await;
                        manager.auto_scale().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker池监控停止");
                        break;
                    }
                }
            }
        })
    }

    async fn set_status(&self, worker_id: &str, status: WorkerStatus) -> Option<WorkerRecord> {
        let mut pools = self.pools.write().await;
        let record = find_record_mut(&mut pools, worker_id).ok()?;
        record.status = status;
        Some(record.clone())
    }

    async fn publish_counts(&self) {
        let pools = self.pools.read().await;
        let active = pools.values().map(WorkerPool::active_workers).sum();
        let busy = pools.values().map(WorkerPool::busy_workers).sum();
        self.metrics.update_worker_counts(active, busy);
    }
}

fn find_record_mut<'a>(
    pools: &'a mut BTreeMap<String, WorkerPool>,
    worker_id: &str,
) -> OrchestratorResult<&'a mut WorkerRecord> {
    pools
        .values_mut()
        .find_map(|pool| pool.workers.get_mut(worker_id))
        .ok_or_else(|| OrchestratorError::WorkerNotFound {
            id: worker_id.to_string(),
        })
}
