//! 优先级调度器
//!
//! 内存中的就绪队列是唯一的事实来源；持久化镜像只用于崩溃恢复。
//! 两者由同一把锁保护，所有入队、出队和调整操作在持锁期间同步写镜像，
//! 镜像写入失败只记录日志与计数，不影响内存状态。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    config::SchedulerConfig,
    models::{DeadLetter, Task, TaskPriority, TaskState, TaskSubmission},
    OrchestratorError, OrchestratorResult, TaskMirror,
};
use orchestrator_infrastructure::MetricsCollector;

use crate::{dependency_checker, ready_queue::ReadyQueue, retry_service::RetryPolicy};

/// 重新入队的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequeueOutcome {
    Requeued {
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
    },
    DeadLettered {
        retry_count: u32,
    },
}

impl RequeueOutcome {
    pub fn is_requeued(&self) -> bool {
        matches!(self, RequeueOutcome::Requeued { .. })
    }
}

/// 队列统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: usize,
    pub delayed: usize,
    pub pending_dependencies: usize,
    pub completed: usize,
    pub dead_lettered: usize,
    pub by_priority: BTreeMap<String, usize>,
    /// 镜像中各档位的任务数，读取失败时为 None
    pub mirror_bands: Option<BTreeMap<String, usize>>,
    pub mirror_errors: u64,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_requeued: u64,
}

/// 启动恢复结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub ready: usize,
    pub pending: usize,
    pub skipped: usize,
    /// 因循环依赖无法就绪而被移入死信的任务
    pub dead_lettered: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    enqueued: u64,
    dequeued: u64,
    requeued: u64,
    mirror_errors: u64,
}

#[derive(Debug, Default)]
struct SchedulerState {
    queue: ReadyQueue,
    pending_tasks: HashMap<String, Task>,
    /// 任务id → 尚未完成的依赖
    pending_deps: HashMap<String, BTreeSet<String>>,
    /// 依赖id → 等待它的任务
    waiting_on: HashMap<String, HashSet<String>>,
    completed: HashMap<String, DateTime<Utc>>,
    /// 完成顺序，用于按容量淘汰
    completed_order: VecDeque<String>,
    dead_letters: VecDeque<DeadLetter>,
    counters: Counters,
}

impl SchedulerState {
    fn contains(&self, task_id: &str) -> bool {
        self.queue.contains(task_id) || self.pending_tasks.contains_key(task_id)
    }

    fn park(&mut self, task: Task, remaining: BTreeSet<String>) {
        for dep in &remaining {
            self.waiting_on
                .entry(dep.clone())
                .or_default()
                .insert(task.id.clone());
        }
        self.pending_deps.insert(task.id.clone(), remaining);
        self.pending_tasks.insert(task.id.clone(), task);
    }

    fn detach_pending(&mut self, task_id: &str) -> Option<Task> {
        let task = self.pending_tasks.remove(task_id)?;
        for dep in self.pending_deps.remove(task_id).unwrap_or_default() {
            if let Some(waiters) = self.waiting_on.get_mut(&dep) {
                waiters.remove(task_id);
                if waiters.is_empty() {
                    self.waiting_on.remove(&dep);
                }
            }
        }
        Some(task)
    }

    fn unmet_dependencies(&self, task: &Task) -> BTreeSet<String> {
        task.dependencies
            .iter()
            .filter(|dep| !self.completed.contains_key(dep.as_str()))
            .cloned()
            .collect()
    }
}

pub struct PriorityScheduler {
    state: Mutex<SchedulerState>,
    mirror: Arc<dyn TaskMirror>,
    retry_policy: RetryPolicy,
    config: SchedulerConfig,
    metrics: MetricsCollector,
}

impl PriorityScheduler {
    pub fn new(mirror: Arc<dyn TaskMirror>, config: Option<SchedulerConfig>) -> Self {
        let config = config.unwrap_or_default();
        Self {
            state: Mutex::new(SchedulerState::default()),
            mirror,
            retry_policy: RetryPolicy::new(Some(config.retry.clone())),
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    fn note_mirror(
        &self,
        state: &mut SchedulerState,
        result: OrchestratorResult<()>,
        op: &str,
        task_id: &str,
    ) {
        if let Err(e) = result {
            state.counters.mirror_errors += 1;
            self.metrics.record_mirror_error();
            warn!("任务镜像操作 {} 失败，任务 {}: {}", op, task_id, e);
        }
    }

    /// 提交任务，返回任务id
    pub async fn submit(&self, submission: TaskSubmission) -> OrchestratorResult<String> {
        let task = submission.into_task(self.config.default_max_retries);
        self.enqueue(task).await
    }

    /// 入队
    ///
    /// 依赖全部完成的任务进入就绪结构，否则进入等待索引。
    /// 重复的任务id与会形成环的依赖都会被拒绝。
    pub async fn enqueue(&self, task: Task) -> OrchestratorResult<String> {
        let mut state = self.state.lock().await;

        if state.contains(&task.id) {
            return Err(OrchestratorError::DuplicateTask {
                id: task.id.clone(),
            });
        }

        let remaining = state.unmet_dependencies(&task);
        if let Some(cycle) =
            dependency_checker::find_cycle(&task.id, &remaining, &state.pending_deps)
        {
            warn!("拒绝任务 {}: 循环依赖 {}", task.id, cycle.join(" -> "));
            return Err(OrchestratorError::CircularDependency {
                task_id: task.id.clone(),
            });
        }

        let task_id = task.id.clone();
        state.counters.enqueued += 1;
        self.metrics.record_task_enqueued(task.priority);

        if remaining.is_empty() {
            let result = self.mirror.mirror_ready(&task).await;
            self.note_mirror(&mut state, result, "mirror_ready", &task_id);
            debug!("任务 {} ({}) 进入就绪队列", task_id, task.priority);
            state.queue.push(task, Utc::now());
        } else {
            let result = self.mirror.mirror_pending(&task).await;
            self.note_mirror(&mut state, result, "mirror_pending", &task_id);
            debug!("任务 {} 等待依赖: {:?}", task_id, remaining);
            state.park(task, remaining);
        }

        Ok(task_id)
    }

    async fn dequeue_locked(&self, state: &mut SchedulerState, now: DateTime<Utc>) -> Option<Task> {
        let task = state.queue.pop_ready(now)?;
        let result = self.mirror.remove_ready(&task).await;
        self.note_mirror(state, result, "remove_ready", &task.id);
        state.counters.dequeued += 1;
        self.metrics.record_task_dequeued();
        debug!("任务 {} 出队", task.id);
        Some(task)
    }

    /// 取出优先级最高的就绪任务，没有时返回 None
    pub async fn dequeue(&self) -> Option<Task> {
        let mut state = self.state.lock().await;
        self.dequeue_locked(&mut state, Utc::now()).await
    }

    /// 连续出队最多 `count` 个任务
    pub async fn dequeue_batch(&self, count: usize) -> Vec<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(count);
        while tasks.len() < count {
            match self.dequeue_locked(&mut state, now).await {
                Some(task) => tasks.push(task),
                None => break,
            }
        }
        tasks
    }

    /// 按id取出一个已到期的就绪任务，延迟中或等待依赖的任务不会被取出
    pub async fn take(&self, task_id: &str) -> Option<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if !state.queue.get(task_id).is_some_and(|t| t.is_due(now)) {
            return None;
        }
        let task = state.queue.remove(task_id)?;
        let result = self.mirror.remove_ready(&task).await;
        self.note_mirror(&mut state, result, "remove_ready", task_id);
        state.counters.dequeued += 1;
        self.metrics.record_task_dequeued();
        debug!("任务 {} 被指定取出", task_id);
        Some(task)
    }

    /// 下一次 `dequeue` 将返回的任务
    pub async fn peek(&self) -> Option<Task> {
        let mut state = self.state.lock().await;
        state.queue.peek(Utc::now()).cloned()
    }

    /// 标记任务完成，返回因此被提升为就绪的任务id
    pub async fn mark_completed(&self, task_id: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if state.completed.insert(task_id.to_string(), now).is_none() {
            state.completed_order.push_back(task_id.to_string());
        }
        while state.completed_order.len() > self.config.completed_capacity {
            if let Some(oldest) = state.completed_order.pop_front() {
                state.completed.remove(&oldest);
            }
        }
        self.metrics.record_task_completed();

        let mut dependents: Vec<String> = state
            .waiting_on
            .remove(task_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        dependents.sort();

        let mut promoted = Vec::new();
        for dependent in dependents {
            let unblocked = match state.pending_deps.get_mut(&dependent) {
                Some(remaining) => {
                    remaining.remove(task_id);
                    remaining.is_empty()
                }
                None => false,
            };
            if !unblocked {
                continue;
            }

            state.pending_deps.remove(&dependent);
            if let Some(task) = state.pending_tasks.remove(&dependent) {
                let result = self.mirror.remove_pending(&dependent).await;
                self.note_mirror(&mut state, result, "remove_pending", &dependent);
                let result = self.mirror.mirror_ready(&task).await;
                self.note_mirror(&mut state, result, "mirror_ready", &dependent);
                state.queue.push(task, now);
                promoted.push(dependent);
            }
        }

        if !promoted.is_empty() {
            info!("任务 {} 完成，提升依赖任务: {:?}", task_id, promoted);
        }
        promoted
    }

    fn dead_letter(&self, state: &mut SchedulerState, task: Task, reason: String) {
        warn!("任务 {} 进入死信队列: {}", task.id, reason);
        state.dead_letters.push_back(DeadLetter {
            task,
            reason,
            dead_lettered_at: Utc::now(),
        });
        while state.dead_letters.len() > self.config.dead_letter_capacity {
            state.dead_letters.pop_front();
        }
        self.metrics.record_task_dead_lettered();
    }

    /// 失败任务重新入队
    ///
    /// `retry_count` 加一后超过 `max_retries` 时任务进入死信，不再入队。
    pub async fn requeue(&self, mut task: Task, delay: Duration) -> RequeueOutcome {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        task.retry_count += 1;
        let retry_count = task.retry_count;

        if task.retries_exhausted() {
            let reason = format!("超过最大重试次数 {}", task.max_retries);
            self.dead_letter(&mut state, task, reason);
            return RequeueOutcome::DeadLettered { retry_count };
        }

        let scheduled_at = now + delay;
        task.scheduled_at = Some(scheduled_at);
        let result = self.mirror.mirror_ready(&task).await;
        self.note_mirror(&mut state, result, "mirror_ready", &task.id);
        info!(
            "任务 {} 第 {} 次重试，计划于 {} 执行",
            task.id,
            retry_count,
            scheduled_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        state.queue.push(task, now);
        state.counters.requeued += 1;
        self.metrics.record_task_requeued();

        RequeueOutcome::Requeued {
            retry_count,
            scheduled_at,
        }
    }

    /// 按退避策略计算延迟后重新入队
    pub async fn requeue_with_backoff(&self, task: Task) -> RequeueOutcome {
        let delay = self.retry_policy.delay_for(task.retry_count);
        self.requeue(task, delay).await
    }

    /// 调整优先级
    pub async fn update_priority(
        &self,
        task_id: &str,
        priority: TaskPriority,
    ) -> OrchestratorResult<()> {
        let mut state = self.state.lock().await;

        if let Some(mut task) = state.queue.remove(task_id) {
            let previous = task.priority;
            task.priority = priority;
            let result = self.mirror.mirror_ready(&task).await;
            self.note_mirror(&mut state, result, "mirror_ready", task_id);
            state.queue.push(task, Utc::now());
            info!("任务 {} 优先级调整: {} -> {}", task_id, previous, priority);
            return Ok(());
        }

        if let Some(task) = state.pending_tasks.get_mut(task_id) {
            task.priority = priority;
            let snapshot = task.clone();
            let result = self.mirror.mirror_pending(&snapshot).await;
            self.note_mirror(&mut state, result, "mirror_pending", task_id);
            return Ok(());
        }

        Err(OrchestratorError::TaskNotFound {
            id: task_id.to_string(),
        })
    }

    /// 取消尚未出队的任务
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().await;

        if let Some(task) = state.queue.remove(task_id) {
            let result = self.mirror.remove_ready(&task).await;
            self.note_mirror(&mut state, result, "remove_ready", task_id);
            info!("已取消就绪任务 {}", task_id);
            return true;
        }

        if state.detach_pending(task_id).is_some() {
            let result = self.mirror.remove_pending(task_id).await;
            self.note_mirror(&mut state, result, "remove_pending", task_id);
            info!("已取消等待依赖的任务 {}", task_id);
            return true;
        }

        false
    }

    /// 清空就绪队列（含延迟任务），返回清除的数量
    pub async fn clear_queue(&self, priority: Option<TaskPriority>) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.queue.clear(priority);
        let result = self.mirror.clear_ready(priority).await;
        self.note_mirror(&mut state, result, "clear_ready", "*");
        info!(
            "清空队列 {}: {} 个任务",
            priority.map_or("all", |p| p.as_str()),
            removed.len()
        );
        removed.len()
    }

    /// 就绪任务中的位置（从0开始），延迟或不存在的任务返回 None
    pub async fn get_task_position(&self, task_id: &str) -> Option<usize> {
        let mut state = self.state.lock().await;
        state.queue.position(task_id, Utc::now())
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        let state = self.state.lock().await;
        state
            .queue
            .get(task_id)
            .or_else(|| state.pending_tasks.get(task_id))
            .cloned()
    }

    /// 尚未出队的全部任务快照（就绪、延迟、等待依赖）
    pub async fn queued_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut waiting: Vec<Task> = state.pending_tasks.values().cloned().collect();
        waiting.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        state.queue.tasks().cloned().chain(waiting).collect()
    }

    pub async fn get_task_state(&self, task_id: &str) -> Option<TaskState> {
        let state = self.state.lock().await;
        let now = Utc::now();

        if let Some(task) = state.queue.get(task_id) {
            return Some(if task.is_due(now) {
                TaskState::Queued
            } else {
                TaskState::Scheduled
            });
        }
        if state.pending_tasks.contains_key(task_id) {
            return Some(TaskState::Blocked);
        }
        if state.completed.contains_key(task_id) {
            return Some(TaskState::Completed);
        }
        if state.dead_letters.iter().any(|d| d.task.id == task_id) {
            return Some(TaskState::DeadLettered);
        }
        None
    }

    /// 等待中任务（传递地）依赖的全部未完成任务
    pub async fn blocking_dependencies(&self, task_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        dependency_checker::transitive_dependencies(task_id, &state.pending_deps)
    }

    /// 最近的死信，新的在前
    pub async fn dead_letters(&self, limit: usize) -> Vec<DeadLetter> {
        let state = self.state.lock().await;
        state.dead_letters.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        let mut stats = {
            let state = self.state.lock().await;
            let breakdown = state.queue.breakdown();
            for (priority, depth) in &breakdown {
                self.metrics.update_queue_depth(*priority, *depth);
            }
            QueueStats {
                ready: state.queue.ready_len(),
                delayed: state.queue.delayed_len(),
                pending_dependencies: state.pending_tasks.len(),
                completed: state.completed.len(),
                dead_lettered: state.dead_letters.len(),
                by_priority: breakdown
                    .into_iter()
                    .map(|(p, n)| (p.as_str().to_string(), n))
                    .collect(),
                mirror_bands: None,
                mirror_errors: state.counters.mirror_errors,
                total_enqueued: state.counters.enqueued,
                total_dequeued: state.counters.dequeued,
                total_requeued: state.counters.requeued,
            }
        };

        match self.mirror.band_sizes().await {
            Ok(sizes) => {
                stats.mirror_bands = Some(
                    sizes
                        .into_iter()
                        .map(|(p, n)| (p.as_str().to_string(), n))
                        .collect(),
                );
            }
            Err(e) => warn!("读取镜像档位统计失败: {}", e),
        }
        stats
    }

    /// 从持久化镜像恢复任务
    ///
    /// 已存在于内存中的任务会被跳过。恢复后仍处于循环依赖中的任务直接进入死信。
    pub async fn recover(&self) -> OrchestratorResult<RecoveryReport> {
        let ready = self.mirror.load_ready().await?;
        let pending = self.mirror.load_pending().await?;

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for task in ready {
            if state.contains(&task.id) {
                report.skipped += 1;
                continue;
            }
            state.queue.push(task, now);
            report.ready += 1;
        }

        for task in pending {
            if state.contains(&task.id) {
                report.skipped += 1;
                continue;
            }
            let remaining = state.unmet_dependencies(&task);
            if remaining.is_empty() {
                let task_id = task.id.clone();
                let result = self.mirror.remove_pending(&task_id).await;
                self.note_mirror(&mut state, result, "remove_pending", &task_id);
                let result = self.mirror.mirror_ready(&task).await;
                self.note_mirror(&mut state, result, "mirror_ready", &task_id);
                state.queue.push(task, now);
                report.ready += 1;
            } else {
                state.park(task, remaining);
                report.pending += 1;
            }
        }

        for task_id in dependency_checker::deadlocked_tasks(&state.pending_deps) {
            if let Some(task) = state.detach_pending(&task_id) {
                let result = self.mirror.remove_pending(&task_id).await;
                self.note_mirror(&mut state, result, "remove_pending", &task_id);
                self.dead_letter(&mut state, task, "循环依赖，无法就绪".to_string());
                report.pending = report.pending.saturating_sub(1);
                report.dead_lettered.push(task_id);
            }
        }

        if !report.dead_lettered.is_empty() {
            error!("恢复时发现循环依赖任务: {:?}", report.dead_lettered);
        }
        info!(
            "任务恢复完成: 就绪 {}，等待依赖 {}，跳过 {}",
            report.ready, report.pending, report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TaskBuilder;
    use orchestrator_infrastructure::InMemoryTaskMirror;

    fn scheduler() -> (PriorityScheduler, Arc<InMemoryTaskMirror>) {
        let mirror = Arc::new(InMemoryTaskMirror::new());
        (PriorityScheduler::new(mirror.clone(), None), mirror)
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (scheduler, _) = scheduler();
        scheduler.enqueue(TaskBuilder::new("a").build()).await.unwrap();
        let err = scheduler
            .enqueue(TaskBuilder::new("a").build())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_at_enqueue() {
        let (scheduler, _) = scheduler();
        scheduler
            .enqueue(TaskBuilder::new("b").depends_on(&["a"]).build())
            .await
            .unwrap();
        let err = scheduler
            .enqueue(TaskBuilder::new("a").depends_on(&["b"]).build())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CircularDependency { .. }));

        let err = scheduler
            .enqueue(TaskBuilder::new("self").depends_on(&["self"]).build())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CircularDependency { .. }));
    }

    #[tokio::test]
    async fn test_mirror_follows_task_lifecycle() {
        let (scheduler, mirror) = scheduler();
        scheduler.enqueue(TaskBuilder::new("a").build()).await.unwrap();
        scheduler
            .enqueue(TaskBuilder::new("b").depends_on(&["a"]).build())
            .await
            .unwrap();
        assert!(mirror.contains_ready("a").await);
        assert!(mirror.contains_pending("b").await);

        let a = scheduler.dequeue().await.unwrap();
        assert!(!mirror.contains_ready(&a.id).await);

        scheduler.mark_completed("a").await;
        assert!(!mirror.contains_pending("b").await);
        assert!(mirror.contains_ready("b").await);
    }

    #[tokio::test]
    async fn test_completed_records_are_capped() {
        let mirror = Arc::new(InMemoryTaskMirror::new());
        let scheduler = PriorityScheduler::new(
            mirror,
            Some(SchedulerConfig {
                completed_capacity: 2,
                ..Default::default()
            }),
        );
        for id in ["a", "b", "c"] {
            scheduler.mark_completed(id).await;
        }
        // 重复完成不占额外名额
        scheduler.mark_completed("c").await;

        assert_eq!(scheduler.get_queue_stats().await.completed, 2);
        assert_eq!(scheduler.get_task_state("a").await, None);
        assert_eq!(scheduler.get_task_state("b").await, Some(TaskState::Completed));
        assert_eq!(scheduler.get_task_state("c").await, Some(TaskState::Completed));
    }

    #[tokio::test]
    async fn test_update_priority_repositions() {
        let (scheduler, _) = scheduler();
        let now = Utc::now();
        scheduler
            .enqueue(TaskBuilder::new("first").created(now).build())
            .await
            .unwrap();
        scheduler
            .enqueue(
                TaskBuilder::new("second")
                    .created(now + Duration::milliseconds(1))
                    .build(),
            )
            .await
            .unwrap();

        scheduler
            .update_priority("second", TaskPriority::Critical)
            .await
            .unwrap();
        assert_eq!(scheduler.peek().await.unwrap().id, "second");
        assert_eq!(scheduler.get_task_position("first").await, Some(1));

        let err = scheduler
            .update_priority("missing", TaskPriority::Low)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_pending_releases_dependency_index() {
        let (scheduler, mirror) = scheduler();
        scheduler
            .enqueue(TaskBuilder::new("b").depends_on(&["a"]).build())
            .await
            .unwrap();
        assert!(scheduler.cancel("b").await);
        assert!(!scheduler.cancel("b").await);
        assert!(!mirror.contains_pending("b").await);

        // 取消后同一id可以重新提交，且不再误报循环依赖
        scheduler
            .enqueue(TaskBuilder::new("a").depends_on(&["b"]).build())
            .await
            .unwrap();
        assert_eq!(scheduler.get_task_state("a").await, Some(TaskState::Blocked));
    }

    #[tokio::test]
    async fn test_task_states() {
        let (scheduler, _) = scheduler();
        let later = Utc::now() + Duration::hours(1);
        scheduler
            .enqueue(TaskBuilder::new("later").scheduled(later).build())
            .await
            .unwrap();
        scheduler.enqueue(TaskBuilder::new("now").build()).await.unwrap();

        assert_eq!(
            scheduler.get_task_state("later").await,
            Some(TaskState::Scheduled)
        );
        assert_eq!(scheduler.get_task_state("now").await, Some(TaskState::Queued));

        let task = scheduler.dequeue().await.unwrap();
        scheduler.mark_completed(&task.id).await;
        assert_eq!(
            scheduler.get_task_state("now").await,
            Some(TaskState::Completed)
        );
        assert_eq!(scheduler.get_task_state("unknown").await, None);
    }

    #[tokio::test]
    async fn test_queued_tasks_snapshot() {
        let (scheduler, _) = scheduler();
        scheduler
            .enqueue(
                TaskBuilder::new("later")
                    .scheduled(Utc::now() + Duration::hours(1))
                    .build(),
            )
            .await
            .unwrap();
        scheduler
            .enqueue(TaskBuilder::new("blocked").depends_on(&["x"]).build())
            .await
            .unwrap();
        scheduler.enqueue(TaskBuilder::new("ready").build()).await.unwrap();

        let ids: Vec<String> = scheduler
            .queued_tasks()
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["ready", "later", "blocked"]);
    }

    #[tokio::test]
    async fn test_take_only_returns_due_tasks() {
        let (scheduler, mirror) = scheduler();
        scheduler
            .enqueue(
                TaskBuilder::new("later")
                    .scheduled(Utc::now() + Duration::hours(1))
                    .build(),
            )
            .await
            .unwrap();
        scheduler
            .enqueue(TaskBuilder::new("blocked").depends_on(&["x"]).build())
            .await
            .unwrap();
        scheduler.enqueue(TaskBuilder::new("low").build()).await.unwrap();

        assert!(scheduler.take("later").await.is_none());
        assert!(scheduler.take("blocked").await.is_none());
        assert_eq!(scheduler.take("low").await.unwrap().id, "low");
        assert!(scheduler.take("low").await.is_none());
        assert!(!mirror.contains_ready("low").await);
        assert_eq!(scheduler.get_queue_stats().await.total_dequeued, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_capacity_is_bounded() {
        let mirror = Arc::new(InMemoryTaskMirror::new());
        let config = SchedulerConfig {
            dead_letter_capacity: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = PriorityScheduler::new(mirror, Some(config));

        for id in ["a", "b", "c"] {
            let outcome = scheduler
                .requeue(TaskBuilder::new(id).max_retries(0).build(), Duration::zero())
                .await;
            assert_eq!(outcome, RequeueOutcome::DeadLettered { retry_count: 1 });
        }

        let letters = scheduler.dead_letters(10).await;
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].task.id, "c");
        assert_eq!(letters[1].task.id, "b");
    }

    #[tokio::test]
    async fn test_recover_reloads_and_dead_letters_cycles() {
        let mirror = Arc::new(InMemoryTaskMirror::new());
        mirror
            .mirror_ready(&TaskBuilder::new("r").priority(TaskPriority::High).build())
            .await
            .unwrap();
        mirror
            .mirror_pending(&TaskBuilder::new("p").depends_on(&["r"]).build())
            .await
            .unwrap();
        mirror
            .mirror_pending(&TaskBuilder::new("x").depends_on(&["y"]).build())
            .await
            .unwrap();
        mirror
            .mirror_pending(&TaskBuilder::new("y").depends_on(&["x"]).build())
            .await
            .unwrap();

        let scheduler = PriorityScheduler::new(mirror.clone(), None);
        let report = scheduler.recover().await.unwrap();
        assert_eq!(report.ready, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(report.dead_lettered, vec!["x", "y"]);

        assert_eq!(scheduler.dequeue().await.unwrap().id, "r");
        assert_eq!(scheduler.mark_completed("r").await, vec!["p"]);
        assert_eq!(scheduler.dequeue().await.unwrap().id, "p");

        // 再次恢复时内存中已有的任务被跳过
        let report = scheduler.recover().await.unwrap();
        assert_eq!(report.ready, 0);
    }
}
