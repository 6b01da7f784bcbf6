use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use orchestrator_core::{config::PoolConfig, PoolStats, WorkerRecord, WorkerStatus};

/// 自动扩缩容的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

/// 绑定到一个命名队列的Worker池
///
/// 只保存簿记信息，进程句柄由 [`WorkerPoolManager`](crate::WorkerPoolManager) 持有。
#[derive(Debug, Clone)]
pub struct WorkerPool {
    pub config: PoolConfig,
    pub workers: BTreeMap<String, WorkerRecord>,
    /// 重启预算耗尽后暂停自动扩缩容，直到告警解除
    pub suspended: bool,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            workers: BTreeMap::new(),
            suspended: false,
        }
    }

    /// 未在配置中声明的队列使用的池
    pub fn lazy(queue: &str) -> Self {
        Self::new(PoolConfig::new(queue, 1, 4))
    }

    /// IDLE + BUSY
    pub fn active_workers(&self) -> usize {
        self.workers.values().filter(|w| w.status.is_active()).count()
    }

    pub fn busy_workers(&self) -> usize {
        self.count_status(WorkerStatus::Busy)
    }

    pub fn count_status(&self, status: WorkerStatus) -> usize {
        self.workers.values().filter(|w| w.status == status).count()
    }

    /// 占用名额的Worker：启动中、空闲、忙碌
    pub fn occupied_slots(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status.is_active() || w.status == WorkerStatus::Starting)
            .count()
    }

    pub fn has_capacity(&self) -> bool {
        self.occupied_slots() < self.config.max_workers
    }

    /// busy / active，没有活跃Worker时为0
    pub fn utilization(&self) -> f64 {
        let active = self.active_workers();
        if active == 0 {
            return 0.0;
        }
        self.busy_workers() as f64 / active as f64
    }

    /// 把目标数量限制在 [min_workers, max_workers]
    pub fn clamp_target(&self, target: usize) -> usize {
        target.clamp(self.config.min_workers, self.config.max_workers)
    }

    /// 按利用率判断扩缩方向，两阈值之间不动作
    pub fn scale_direction(&self) -> Option<ScaleDirection> {
        let utilization = self.utilization();
        if utilization >= self.config.scale_up_threshold {
            Some(ScaleDirection::Up)
        } else if utilization <= self.config.scale_down_threshold {
            Some(ScaleDirection::Down)
        } else {
            None
        }
    }

    /// 自动扩缩容的目标数量，`None` 表示不需要调整或池已暂停
    pub fn auto_scale_target(&self) -> Option<usize> {
        if self.suspended {
            return None;
        }
        let active = self.active_workers();
        let target = match self.scale_direction()? {
            ScaleDirection::Up => self.clamp_target(active + 1),
            ScaleDirection::Down => self.clamp_target(active.saturating_sub(1)),
        };
        (target != active).then_some(target)
    }

    /// 缩容时的停止顺序：先IDLE，再BUSY
    pub fn stop_candidates(&self) -> Vec<String> {
        let idle = self
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle);
        let busy = self
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Busy);
        idle.chain(busy).map(|w| w.worker_id.clone()).collect()
    }

    /// 已退出的记录最多保留 `max_workers` 条，先删除最早启动的，返回被删除的ID
    pub fn prune_dead_records(&mut self) -> Vec<String> {
        let mut dead: Vec<(Option<DateTime<Utc>>, String)> = self
            .workers
            .values()
            .filter(|w| matches!(w.status, WorkerStatus::Stopped | WorkerStatus::Error))
            .map(|w| (w.started_at, w.worker_id.clone()))
            .collect();
        if dead.len() <= self.config.max_workers {
            return Vec::new();
        }
        dead.sort();
        let excess = dead.len() - self.config.max_workers;
        dead.into_iter()
            .take(excess)
            .map(|(_, worker_id)| {
                self.workers.remove(&worker_id);
                worker_id
            })
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            min_workers: self.config.min_workers,
            max_workers: self.config.max_workers,
            active_workers: self.active_workers(),
            busy_workers: self.busy_workers(),
            utilization: self.utilization(),
            workers: self.workers.values().cloned().collect(),
        }
    }
}
