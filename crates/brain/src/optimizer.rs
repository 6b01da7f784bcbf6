//! 系统优化器
//!
//! `optimize` 是纯函数：给定系统状态与约束，按当前策略给出调整建议，
//! 不直接修改任何组件。调整落地之后再用 `evaluate` 对比前后指标，
//! 得到按策略权重加权的改进百分比。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult, TaskPriority};
use serde::{Deserialize, Serialize};

const HISTORY_LIMIT: usize = 100;
const DEFAULT_MAX_WORKERS: usize = 10;
const DEFAULT_ESTIMATED_DURATION_SECONDS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    LoadBalance,
    PriorityBased,
    DeadlineDriven,
    CostOptimized,
    ThroughputMaximized,
    LatencyMinimized,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategy::LoadBalance => "load_balance",
            OptimizationStrategy::PriorityBased => "priority_based",
            OptimizationStrategy::DeadlineDriven => "deadline_driven",
            OptimizationStrategy::CostOptimized => "cost_optimized",
            OptimizationStrategy::ThroughputMaximized => "throughput_maximized",
            OptimizationStrategy::LatencyMinimized => "latency_minimized",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationStrategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load_balance" => Ok(OptimizationStrategy::LoadBalance),
            "priority_based" => Ok(OptimizationStrategy::PriorityBased),
            "deadline_driven" => Ok(OptimizationStrategy::DeadlineDriven),
            "cost_optimized" => Ok(OptimizationStrategy::CostOptimized),
            "throughput_maximized" => Ok(OptimizationStrategy::ThroughputMaximized),
            "latency_minimized" => Ok(OptimizationStrategy::LatencyMinimized),
            other => Err(OrchestratorError::Configuration(format!(
                "未知的优化策略: {other}"
            ))),
        }
    }
}

/// 优化器看到的待处理任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTaskInfo {
    pub task_id: String,
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<f64>,
}

/// 系统状态快照，按队列名组织
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub tasks_per_minute: f64,
    pub avg_task_latency: f64,
    pub total_queue_depth: usize,
    pub avg_worker_utilization: f64,
    pub error_rate: f64,
    pub queue_loads: BTreeMap<String, f64>,
    pub workers: BTreeMap<String, usize>,
    pub throughputs: BTreeMap<String, f64>,
    pub latencies: BTreeMap<String, f64>,
    pub error_rates: BTreeMap<String, f64>,
    pub pending_tasks: Vec<PendingTaskInfo>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl SystemState {
    fn workers_of(&self, queue: &str, default: usize) -> usize {
        self.workers.get(queue).copied().unwrap_or(default)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            throughput: self.tasks_per_minute,
            avg_latency: self.avg_task_latency,
            queue_depth: self.total_queue_depth,
            worker_utilization: self.avg_worker_utilization,
            error_rate: self.error_rate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConstraints {
    /// 成本上限，按 `资源单价 × Worker数` 计
    pub budget: Option<f64>,
    pub max_workers: BTreeMap<String, usize>,
    /// 目标延迟（秒），默认 1.0
    pub target_latency: Option<f64>,
}

impl OptimizationConstraints {
    fn max_workers_of(&self, queue: &str) -> usize {
        self.max_workers
            .get(queue)
            .copied()
            .unwrap_or(DEFAULT_MAX_WORKERS)
    }
}

/// 一条调整建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizationChange {
    ScaleWorkers {
        queue: String,
        target_workers: usize,
        reason: String,
    },
    UpdatePriority {
        task_id: String,
        new_priority: TaskPriority,
        reason: String,
    },
}

impl OptimizationChange {
    pub fn reason(&self) -> &str {
        match self {
            OptimizationChange::ScaleWorkers { reason, .. }
            | OptimizationChange::UpdatePriority { reason, .. } => reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub throughput: f64,
    pub avg_latency: f64,
    pub queue_depth: usize,
    pub worker_utilization: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub strategy: OptimizationStrategy,
    pub success: bool,
    pub changes_made: Vec<OptimizationChange>,
    pub metrics_before: MetricsSnapshot,
    pub metrics_after: MetricsSnapshot,
    /// 百分比
    pub improvement: f64,
    pub timestamp: DateTime<Utc>,
}

/// 多目标权重，设置时自动归一化
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeights {
    pub throughput: f64,
    pub latency: f64,
    pub cost: f64,
    pub reliability: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            throughput: 0.3,
            latency: 0.3,
            cost: 0.2,
            reliability: 0.2,
        }
    }
}

impl StrategyWeights {
    pub fn normalized(self) -> OrchestratorResult<Self> {
        let values = [self.throughput, self.latency, self.cost, self.reliability];
        if values.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(OrchestratorError::Configuration(
                "策略权重必须为非负数".to_string(),
            ));
        }
        let total: f64 = values.iter().sum();
        if total <= 0.0 {
            return Err(OrchestratorError::Configuration(
                "策略权重之和必须大于0".to_string(),
            ));
        }
        Ok(Self {
            throughput: self.throughput / total,
            latency: self.latency / total,
            cost: self.cost / total,
            reliability: self.reliability / total,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    HighUtilization,
    HighLatency,
    HighErrorRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub queue: String,
    pub kind: BottleneckKind,
    pub severity: Severity,
    pub value: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub total_optimizations: usize,
    pub recent_optimizations: Vec<OptimizationResult>,
    pub avg_improvement: f64,
    pub most_common_strategy: OptimizationStrategy,
    pub total_changes_made: usize,
}

#[derive(Debug, Clone)]
pub struct SystemOptimizer {
    strategy: OptimizationStrategy,
    weights: StrategyWeights,
    resource_costs: BTreeMap<String, f64>,
    history: Vec<OptimizationResult>,
}

impl Default for SystemOptimizer {
    fn default() -> Self {
        Self::new(OptimizationStrategy::LoadBalance)
    }
}

impl SystemOptimizer {
    pub fn new(strategy: OptimizationStrategy) -> Self {
        Self {
            strategy,
            weights: StrategyWeights::default(),
            resource_costs: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn strategy(&self) -> OptimizationStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: OptimizationStrategy) {
        self.strategy = strategy;
    }

    pub fn weights(&self) -> StrategyWeights {
        self.weights
    }

    pub fn set_strategy_weights(&mut self, weights: StrategyWeights) -> OrchestratorResult<()> {
        self.weights = weights.normalized()?;
        Ok(())
    }

    pub fn set_resource_costs(&mut self, costs: BTreeMap<String, f64>) {
        self.resource_costs = costs;
    }

    fn cost_of(&self, queue: &str) -> f64 {
        self.resource_costs.get(queue).copied().unwrap_or(1.0)
    }

    pub fn optimize(&self, state: &SystemState, constraints: &OptimizationConstraints) -> Vec<OptimizationChange> {
        self.optimize_at(state, constraints, Utc::now())
    }

    pub fn optimize_at(
        &self,
        state: &SystemState,
        constraints: &OptimizationConstraints,
        now: DateTime<Utc>,
    ) -> Vec<OptimizationChange> {
        match self.strategy {
            OptimizationStrategy::LoadBalance => load_balance(state),
            OptimizationStrategy::PriorityBased => priority_based(state),
            OptimizationStrategy::DeadlineDriven => deadline_driven(state, now),
            OptimizationStrategy::CostOptimized => self.cost_optimized(state, constraints),
            OptimizationStrategy::ThroughputMaximized => throughput_maximized(state, constraints),
            OptimizationStrategy::LatencyMinimized => latency_minimized(state, constraints),
        }
    }

    /// 对比调整前后的状态并记入历史
    pub fn evaluate(
        &mut self,
        before: &SystemState,
        after: &SystemState,
        changes: Vec<OptimizationChange>,
    ) -> OptimizationResult {
        let metrics_before = before.snapshot();
        let metrics_after = after.snapshot();
        let improvement = self.improvement(&metrics_before, &metrics_after);
        let result = OptimizationResult {
            strategy: self.strategy,
            success: improvement >= 0.0,
            changes_made: changes,
            metrics_before,
            metrics_after,
            improvement,
            timestamp: Utc::now(),
        };
        self.history.push(result.clone());
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
        result
    }

    /// 吞吐越高越好，延迟与错误率越低越好；基线为0的维度不参与计算
    pub fn improvement(&self, before: &MetricsSnapshot, after: &MetricsSnapshot) -> f64 {
        let mut parts = Vec::new();
        if before.throughput > 0.0 {
            parts.push((after.throughput - before.throughput) / before.throughput * self.weights.throughput);
        }
        if before.avg_latency > 0.0 {
            parts.push((before.avg_latency - after.avg_latency) / before.avg_latency * self.weights.latency);
        }
        if before.error_rate > 0.0 {
            parts.push((before.error_rate - after.error_rate) / before.error_rate * self.weights.reliability);
        }
        parts.iter().sum::<f64>() * 100.0
    }

    pub fn analyze_bottlenecks(&self, state: &SystemState) -> Vec<Bottleneck> {
        let queues: BTreeSet<&String> = state.queue_loads.keys().chain(state.workers.keys()).collect();
        let mut bottlenecks = Vec::new();

        for queue in queues {
            let load = state.queue_loads.get(queue).copied().unwrap_or(0.0);
            let workers = state.workers_of(queue, 1);
            let utilization = if workers > 0 { load / workers as f64 } else { 0.0 };
            let latency = state.latencies.get(queue).copied().unwrap_or(0.0);
            let error_rate = state.error_rates.get(queue).copied().unwrap_or(0.0);

            if utilization > 0.9 {
                bottlenecks.push(Bottleneck {
                    queue: queue.clone(),
                    kind: BottleneckKind::HighUtilization,
                    severity: Severity::High,
                    value: utilization,
                    recommendation: "增加Worker".to_string(),
                });
            }
            if latency > 5.0 {
                bottlenecks.push(Bottleneck {
                    queue: queue.clone(),
                    kind: BottleneckKind::HighLatency,
                    severity: Severity::Medium,
                    value: latency,
                    recommendation: "增加Worker或优化任务".to_string(),
                });
            }
            if error_rate > 0.1 {
                bottlenecks.push(Bottleneck {
                    queue: queue.clone(),
                    kind: BottleneckKind::HighErrorRate,
                    severity: Severity::High,
                    value: error_rate,
                    recommendation: "排查并修复错误".to_string(),
                });
            }
        }
        bottlenecks
    }

    pub fn history(&self) -> &[OptimizationResult] {
        &self.history
    }

    /// 没有历史时返回 `None`
    pub fn get_optimization_report(&self) -> Option<OptimizationReport> {
        if self.history.is_empty() {
            return None;
        }
        let recent: Vec<OptimizationResult> = self
            .history
            .iter()
            .skip(self.history.len().saturating_sub(10))
            .cloned()
            .collect();

        let mut strategy_counts: BTreeMap<OptimizationStrategy, usize> = BTreeMap::new();
        for result in &self.history {
            *strategy_counts.entry(result.strategy).or_default() += 1;
        }
        let most_common_strategy = strategy_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map_or(self.strategy, |(strategy, _)| strategy);

        Some(OptimizationReport {
            total_optimizations: self.history.len(),
            avg_improvement: recent.iter().map(|r| r.improvement).sum::<f64>() / recent.len() as f64,
            recent_optimizations: recent,
            most_common_strategy,
            total_changes_made: self.history.iter().map(|r| r.changes_made.len()).sum(),
        })
    }

    fn cost_optimized(&self, state: &SystemState, constraints: &OptimizationConstraints) -> Vec<OptimizationChange> {
        let Some(budget) = constraints.budget else {
            return Vec::new();
        };
        let mut current_cost: f64 = state
            .workers
            .iter()
            .map(|(queue, count)| self.cost_of(queue) * *count as f64)
            .sum();
        if current_cost <= budget {
            return Vec::new();
        }

        let mut utilizations: Vec<(&String, f64, usize)> = state
            .workers
            .iter()
            .map(|(queue, count)| {
                let load = state.queue_loads.get(queue).copied().unwrap_or(0.0);
                let utilization = if *count > 0 { load / *count as f64 } else { 0.0 };
                (queue, utilization, *count)
            })
            .collect();
        utilizations.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut changes = Vec::new();
        for (queue, utilization, count) in utilizations {
            if current_cost <= budget {
                break;
            }
            if count > 1 {
                changes.push(OptimizationChange::ScaleWorkers {
                    queue: queue.clone(),
                    target_workers: count - 1,
                    reason: format!("降低成本: 利用率 {:.0}%", utilization * 100.0),
                });
                current_cost -= self.cost_of(queue);
            }
        }
        changes
    }
}

/// 负载超过平均值1.5倍的队列加一个Worker，低于0.3倍的减一个
fn load_balance(state: &SystemState) -> Vec<OptimizationChange> {
    if state.queue_loads.is_empty() {
        return Vec::new();
    }
    let avg_load = state.queue_loads.values().sum::<f64>() / state.queue_loads.len() as f64;

    let mut changes = Vec::new();
    for (queue, load) in &state.queue_loads {
        let current = state.workers_of(queue, 1);
        if *load > avg_load * 1.5 {
            changes.push(OptimizationChange::ScaleWorkers {
                queue: queue.clone(),
                target_workers: current + 1,
                reason: format!("负载 {load:.2} 超过平均值 {avg_load:.2}"),
            });
        } else if *load < avg_load * 0.3 && current > 1 {
            changes.push(OptimizationChange::ScaleWorkers {
                queue: queue.clone(),
                target_workers: current - 1,
                reason: format!("负载 {load:.2} 低于阈值"),
            });
        }
    }
    changes
}

/// 高优先级任务积压超过10个时给 critical 队列加两个Worker，最多6个
fn priority_based(state: &SystemState) -> Vec<OptimizationChange> {
    let high_priority = state
        .pending_tasks
        .iter()
        .filter(|t| t.priority >= TaskPriority::High)
        .count();
    if high_priority <= 10 {
        return Vec::new();
    }
    let current = state.workers_of("critical", 2);
    let target = (current + 2).min(6);
    if target <= current {
        return Vec::new();
    }
    vec![OptimizationChange::ScaleWorkers {
        queue: "critical".to_string(),
        target_workers: target,
        reason: format!("{high_priority} 个高优先级任务待处理"),
    }]
}

/// 剩余时间不足预计耗时1.5倍的任务提升为 critical
fn deadline_driven(state: &SystemState, now: DateTime<Utc>) -> Vec<OptimizationChange> {
    state
        .pending_tasks
        .iter()
        .filter(|t| t.priority != TaskPriority::Critical)
        .filter_map(|task| {
            let deadline = task.deadline?;
            let remaining = (deadline - now).num_milliseconds() as f64 / 1000.0;
            let estimated = task
                .estimated_duration_seconds
                .unwrap_or(DEFAULT_ESTIMATED_DURATION_SECONDS);
            (remaining < estimated * 1.5).then(|| OptimizationChange::UpdatePriority {
                task_id: task.task_id.clone(),
                new_priority: TaskPriority::Critical,
                reason: format!("截止时间风险: 剩余 {remaining:.0} 秒"),
            })
        })
        .collect()
}

fn throughput_maximized(state: &SystemState, constraints: &OptimizationConstraints) -> Vec<OptimizationChange> {
    let mut changes = Vec::new();
    for (queue, load) in &state.queue_loads {
        if *load <= 0.0 {
            continue;
        }
        let current = state.workers_of(queue, 1).max(1);
        let throughput = state.throughputs.get(queue).copied().unwrap_or(0.0);
        let estimated = throughput * (current + 1) as f64 / current as f64;
        if estimated > throughput * 1.2 && current < constraints.max_workers_of(queue) {
            changes.push(OptimizationChange::ScaleWorkers {
                queue: queue.clone(),
                target_workers: current + 1,
                reason: format!("吞吐优化: 预计 {estimated:.1}/分钟"),
            });
        }
    }
    changes
}

fn latency_minimized(state: &SystemState, constraints: &OptimizationConstraints) -> Vec<OptimizationChange> {
    let target_latency = constraints.target_latency.unwrap_or(1.0);
    if target_latency <= 0.0 {
        return Vec::new();
    }
    let mut changes = Vec::new();
    for (queue, latency) in &state.latencies {
        if *latency <= target_latency {
            continue;
        }
        let current = state.workers_of(queue, 1).max(1);
        let needed = (current as f64 * latency / target_latency).ceil() as usize;
        let target = needed.min(constraints.max_workers_of(queue));
        if target > current {
            changes.push(OptimizationChange::ScaleWorkers {
                queue: queue.clone(),
                target_workers: target,
                reason: format!("降低延迟: {latency:.2}s → {target_latency:.2}s"),
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state_with(loads: &[(&str, f64)], workers: &[(&str, usize)]) -> SystemState {
        SystemState {
            queue_loads: loads.iter().map(|(q, l)| (q.to_string(), *l)).collect(),
            workers: workers.iter().map(|(q, w)| (q.to_string(), *w)).collect(),
            ..Default::default()
        }
    }

    fn targets(changes: &[OptimizationChange]) -> Vec<(String, usize)> {
        changes
            .iter()
            .filter_map(|c| match c {
                OptimizationChange::ScaleWorkers {
                    queue,
                    target_workers,
                    ..
                } => Some((queue.clone(), *target_workers)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_load_balance_scales_outliers() {
        let state = state_with(
            &[("frontend", 0.9), ("backend", 0.2), ("qa", 0.05)],
            &[("frontend", 2), ("qa", 3)],
        );
        // 平均负载 ≈ 0.383
        let changes = SystemOptimizer::default().optimize(&state, &OptimizationConstraints::default());
        assert_eq!(
            targets(&changes),
            vec![("frontend".to_string(), 3), ("qa".to_string(), 2)]
        );
    }

    #[test]
    fn test_priority_based_boosts_critical_pool() {
        let mut state = SystemState::default();
        state.pending_tasks = (0..11)
            .map(|i| PendingTaskInfo {
                task_id: format!("t{i}"),
                priority: TaskPriority::High,
                deadline: None,
                estimated_duration_seconds: None,
            })
            .collect();
        state.workers.insert("critical".to_string(), 5);

        let optimizer = SystemOptimizer::new(OptimizationStrategy::PriorityBased);
        let changes = optimizer.optimize(&state, &OptimizationConstraints::default());
        assert_eq!(targets(&changes), vec![("critical".to_string(), 6)]);

        state.pending_tasks.truncate(10);
        assert!(optimizer
            .optimize(&state, &OptimizationConstraints::default())
            .is_empty());
    }

    #[test]
    fn test_deadline_driven_promotes_at_risk_tasks() {
        let now = Utc::now();
        let mut state = SystemState::default();
        state.pending_tasks = vec![
            PendingTaskInfo {
                task_id: "soon".to_string(),
                priority: TaskPriority::Low,
                deadline: Some(now + Duration::seconds(100)),
                estimated_duration_seconds: Some(120.0),
            },
            PendingTaskInfo {
                task_id: "relaxed".to_string(),
                priority: TaskPriority::Low,
                deadline: Some(now + Duration::hours(2)),
                estimated_duration_seconds: None,
            },
            PendingTaskInfo {
                task_id: "no_deadline".to_string(),
                priority: TaskPriority::Low,
                deadline: None,
                estimated_duration_seconds: None,
            },
        ];
        let optimizer = SystemOptimizer::new(OptimizationStrategy::DeadlineDriven);
        let changes = optimizer.optimize_at(&state, &OptimizationConstraints::default(), now);
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            OptimizationChange::UpdatePriority { task_id, new_priority: TaskPriority::Critical, .. }
                if task_id == "soon"
        ));
    }

    #[test]
    fn test_cost_optimized_trims_least_utilized_until_within_budget() {
        let state = state_with(
            &[("frontend", 1.8), ("backend", 0.5), ("qa", 0.1)],
            &[("frontend", 2), ("backend", 2), ("qa", 2)],
        );
        let mut optimizer = SystemOptimizer::new(OptimizationStrategy::CostOptimized);
        optimizer.set_resource_costs(BTreeMap::from([("qa".to_string(), 2.0)]));
        // 当前成本 2 + 2 + 4 = 8
        let constraints = OptimizationConstraints {
            budget: Some(5.0),
            ..Default::default()
        };
        let changes = optimizer.optimize(&state, &constraints);
        assert_eq!(
            targets(&changes),
            vec![("qa".to_string(), 1), ("backend".to_string(), 1)]
        );
        assert!(optimizer
            .optimize(&state, &OptimizationConstraints::default())
            .is_empty());
    }

    #[test]
    fn test_latency_minimized_respects_max_workers() {
        let mut state = state_with(&[], &[("backend", 2)]);
        state.latencies.insert("backend".to_string(), 3.0);
        let constraints = OptimizationConstraints {
            max_workers: BTreeMap::from([("backend".to_string(), 5)]),
            ..Default::default()
        };
        let optimizer = SystemOptimizer::new(OptimizationStrategy::LatencyMinimized);
        assert_eq!(
            targets(&optimizer.optimize(&state, &constraints)),
            vec![("backend".to_string(), 5)]
        );
    }

    #[test]
    fn test_throughput_maximized_stops_at_diminishing_returns() {
        let mut state = state_with(&[("a", 1.0), ("b", 1.0)], &[("a", 2), ("b", 5)]);
        state.throughputs.insert("a".to_string(), 10.0);
        state.throughputs.insert("b".to_string(), 10.0);
        let optimizer = SystemOptimizer::new(OptimizationStrategy::ThroughputMaximized);
        assert_eq!(
            targets(&optimizer.optimize(&state, &OptimizationConstraints::default())),
            vec![("a".to_string(), 3)]
        );
    }

    #[test]
    fn test_weighted_improvement() {
        let mut optimizer = SystemOptimizer::default();
        let before = SystemState {
            tasks_per_minute: 10.0,
            avg_task_latency: 2.0,
            error_rate: 0.2,
            ..Default::default()
        };
        let after = SystemState {
            tasks_per_minute: 12.0,
            avg_task_latency: 1.0,
            error_rate: 0.2,
            ..Default::default()
        };
        // 0.2 * 0.3 + 0.5 * 0.3 + 0 * 0.2 = 0.21
        let result = optimizer.evaluate(&before, &after, Vec::new());
        assert!((result.improvement - 21.0).abs() < 1e-9);
        assert!(result.success);

        let report = optimizer.get_optimization_report().unwrap();
        assert_eq!(report.total_optimizations, 1);
        assert_eq!(report.most_common_strategy, OptimizationStrategy::LoadBalance);
    }

    #[test]
    fn test_weights_are_normalized() {
        let mut optimizer = SystemOptimizer::default();
        optimizer
            .set_strategy_weights(StrategyWeights {
                throughput: 2.0,
                latency: 1.0,
                cost: 1.0,
                reliability: 0.0,
            })
            .unwrap();
        assert_eq!(optimizer.weights().throughput, 0.5);
        assert!(optimizer
            .set_strategy_weights(StrategyWeights {
                throughput: 0.0,
                latency: 0.0,
                cost: 0.0,
                reliability: 0.0,
            })
            .is_err());
    }

    #[test]
    fn test_bottlenecks() {
        let mut state = state_with(&[("qa", 2.0)], &[("qa", 2), ("devops", 1)]);
        state.latencies.insert("devops".to_string(), 6.0);
        state.error_rates.insert("qa".to_string(), 0.25);
        let bottlenecks = SystemOptimizer::default().analyze_bottlenecks(&state);
        let kinds: Vec<(String, BottleneckKind)> = bottlenecks
            .iter()
            .map(|b| (b.queue.clone(), b.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("devops".to_string(), BottleneckKind::HighLatency),
                ("qa".to_string(), BottleneckKind::HighUtilization),
                ("qa".to_string(), BottleneckKind::HighErrorRate),
            ]
        );
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "cost_optimized".parse::<OptimizationStrategy>().unwrap(),
            OptimizationStrategy::CostOptimized
        );
        assert!("fastest".parse::<OptimizationStrategy>().is_err());
    }
}
