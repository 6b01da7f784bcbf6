use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::{config::WorkerPoolConfig, WorkerStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::pool_manager::WorkerPoolManager;

const HEALTH_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    Exists,
    ProcessRunning,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub check: HealthCheckKind,
    pub passed: bool,
}

/// 单个Worker的健康检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub healthy: bool,
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

/// 一轮健康检查的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub healthy_count: usize,
    pub unhealthy_count: usize,
    pub restarted: Vec<String>,
    pub workers: BTreeMap<String, WorkerHealth>,
}

/// 队列的重启次数超出预算后产生的告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAlert {
    pub queue: String,
    /// 触发告警的Worker
    pub worker_id: String,
    pub message: String,
    pub restarts_in_window: usize,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct HealthState {
    history: HashMap<String, VecDeque<(DateTime<Utc>, bool)>>,
    /// 按队列记录的重启时间
    restarts: HashMap<String, VecDeque<DateTime<Utc>>>,
    /// 按队列的未解除告警
    alerts: BTreeMap<String, WorkerAlert>,
}

impl HealthState {
    fn restarts_in_window(&mut self, queue: &str, window_start: DateTime<Utc>) -> usize {
        let Some(restarts) = self.restarts.get_mut(queue) else {
            return 0;
        };
        while restarts.front().is_some_and(|at| *at < window_start) {
            restarts.pop_front();
        }
        restarts.len()
    }
}

/// Worker健康检查器
///
/// 每个队列在 `restart_window` 滚动窗口内最多重启 `max_restarts` 次。
/// 超出后Worker保持停止，队列产生告警并暂停自动扩缩容；
/// 窗口内的重启次数回落到预算以下时告警解除，池恢复自动扩缩容。
pub struct WorkerHealthChecker {
    manager: Arc<WorkerPoolManager>,
    max_restarts: usize,
    restart_window: chrono::Duration,
    state: Mutex<HealthState>,
}

impl WorkerHealthChecker {
    pub fn new(manager: Arc<WorkerPoolManager>, config: Option<WorkerPoolConfig>) -> Self {
        let config = config.unwrap_or_else(|| manager.config().clone());
        Self {
            manager,
            max_restarts: config.max_restarts as usize,
            restart_window: chrono::Duration::seconds(config.restart_window_seconds as i64),
            state: Mutex::new(HealthState::default()),
        }
    }

    /// 检查单个Worker：是否存在、进程是否存活、状态是否为ERROR
    pub async fn check_health(&self, worker_id: &str) -> WorkerHealth {
        let now = Utc::now();
        let checks = match self.manager.worker_liveness(worker_id).await {
            None => vec![HealthCheck {
                check: HealthCheckKind::Exists,
                passed: false,
            }],
            Some(liveness) => vec![
                HealthCheck {
                    check: HealthCheckKind::Exists,
                    passed: true,
                },
                HealthCheck {
                    check: HealthCheckKind::ProcessRunning,
                    passed: liveness.process_running,
                },
                HealthCheck {
                    check: HealthCheckKind::Status,
                    passed: liveness.status != WorkerStatus::Error,
                },
            ],
        };
        let healthy = checks.iter().all(|c| c.passed);

        let mut state = self.state.lock().await;
        let history = state.history.entry(worker_id.to_string()).or_default();
        history.push_back((now, healthy));
        while history.len() > HEALTH_HISTORY_LIMIT {
            history.pop_front();
        }

        WorkerHealth {
            worker_id: worker_id.to_string(),
            healthy,
            checks,
            checked_at: now,
        }
    }

    /// 尝试重启不健康的Worker，超出所在队列的重启预算时返回 false 并告警
    pub async fn handle_unhealthy_worker(&self, worker_id: &str) -> bool {
        let Some(queue) = self.manager.get_worker(worker_id).await.map(|w| w.queue) else {
            return false;
        };
        let now = Utc::now();
        {
            let mut state = self.state.lock().await;
            let in_window = state.restarts_in_window(&queue, now - self.restart_window);
            if in_window >= self.max_restarts {
                if !state.alerts.contains_key(&queue) {
                    let message = format!(
                        "队列 {} 在 {} 秒内已重启 {} 次，Worker {} 不再自动重启",
                        queue,
                        self.restart_window.num_seconds(),
                        in_window,
                        worker_id
                    );
                    error!("{}", message);
                    state.alerts.insert(
                        queue.clone(),
                        WorkerAlert {
                            queue: queue.clone(),
                            worker_id: worker_id.to_string(),
                            message,
                            restarts_in_window: in_window,
                            raised_at: now,
                        },
                    );
                }
                drop(state);
                self.manager.suspend_pool(&queue).await;
                return false;
            }
        }

        match self.manager.restart_worker(worker_id).await {
            Ok(Some(_)) => {
                let mut state = self.state.lock().await;
                state.restarts.entry(queue).or_default().push_back(now);
                info!("不健康的Worker已重启: {}", worker_id);
                true
            }
            Ok(None) => {
                warn!("Worker池已满，无法重启: {}", worker_id);
                false
            }
            Err(e) => {
                error!("重启Worker {} 失败: {}", worker_id, e);
                false
            }
        }
    }

    /// 解除重启次数已回落到预算以下的告警，返回恢复的队列
    pub async fn release_expired_alerts(&self) -> Vec<String> {
        let window_start = Utc::now() - self.restart_window;
        let released: Vec<String> = {
            let mut state = self.state.lock().await;
            let queues: Vec<String> = state.alerts.keys().cloned().collect();
            let released: Vec<String> = queues
                .into_iter()
                .filter(|queue| state.restarts_in_window(queue, window_start) < self.max_restarts)
                .collect();
            for queue in &released {
                state.alerts.remove(queue);
            }
            released
        };

        for queue in &released {
            info!("队列 {} 的重启告警已解除", queue);
            self.manager.resume_pool(queue).await;
        }
        released
    }

    /// 检查所有Worker，对不健康的尝试重启
    pub async fn run_health_checks(&self) -> HealthReport {
        self.manager.refresh_worker_status().await;
        self.release_expired_alerts().await;

        let mut report = HealthReport {
            timestamp: Utc::now(),
            healthy_count: 0,
            unhealthy_count: 0,
            restarted: Vec::new(),
            workers: BTreeMap::new(),
        };

        let worker_ids = self.manager.worker_ids().await;
        {
            // 已被清理的Worker不再保留历史
            let known: HashSet<&String> = worker_ids.iter().collect();
            self.state
                .lock()
                .await
                .history
                .retain(|worker_id, _| known.contains(worker_id));
        }

        for worker_id in worker_ids {
            let health = self.check_health(&worker_id).await;
            if health.healthy {
                report.healthy_count += 1;
            } else {
                report.unhealthy_count += 1;
                warn!("Worker不健康: {} {:?}", worker_id, health.checks);
                if self.handle_unhealthy_worker(&worker_id).await {
                    report.restarted.push(worker_id.clone());
                }
            }
            report.workers.insert(worker_id, health);
        }
        report
    }

    /// 最近的健康检查记录，最早的在前
    pub async fn health_history(&self, worker_id: &str) -> Vec<(DateTime<Utc>, bool)> {
        let state = self.state.lock().await;
        state
            .history
            .get(worker_id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 尚未解除的告警，每个队列最多一条
    pub async fn alerts(&self) -> Vec<WorkerAlert> {
        self.state.lock().await.alerts.values().cloned().collect()
    }

    pub fn start(
        self: &Arc<Self>,
        interval_duration: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = checker.run_health_checks().await;
                        if report.unhealthy_count > 0 {
                            warn!(
                                "健康检查: {} 健康, {} 不健康, {} 已重启",
                                report.healthy_count,
                                report.unhealthy_count,
                                report.restarted.len()
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker健康检查停止");
                        break;
                    }
                }
            }
        })
    }
}
