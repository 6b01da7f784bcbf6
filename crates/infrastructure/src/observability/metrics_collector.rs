//! 编排系统指标
//!
//! 通过 `metrics` 门面记录；未安装导出器时所有调用都是空操作。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram, Counter, Gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use orchestrator_core::models::TaskPriority;

/// 安装Prometheus导出器并监听 `bind_address`
pub fn install_prometheus_exporter(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标导出地址: {bind_address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus导出器失败")?;
    info!("Prometheus指标导出已启动: {}", addr);
    Ok(())
}

#[derive(Clone)]
pub struct MetricsCollector {
    tasks_dequeued_total: Counter,
    tasks_requeued_total: Counter,
    tasks_dead_lettered_total: Counter,
    tasks_completed_total: Counter,
    mirror_errors_total: Counter,
    worker_restarts_total: Counter,
    decisions_executed_total: Counter,
    decisions_failed_total: Counter,
    commands_processed_total: Counter,

    active_workers: Gauge,
    busy_workers: Gauge,
    registered_agents: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_dequeued_total: counter!("orchestrator_tasks_dequeued_total"),
            tasks_requeued_total: counter!("orchestrator_tasks_requeued_total"),
            tasks_dead_lettered_total: counter!("orchestrator_tasks_dead_lettered_total"),
            tasks_completed_total: counter!("orchestrator_tasks_completed_total"),
            mirror_errors_total: counter!("orchestrator_mirror_errors_total"),
            worker_restarts_total: counter!("orchestrator_worker_restarts_total"),
            decisions_executed_total: counter!("orchestrator_decisions_executed_total"),
            decisions_failed_total: counter!("orchestrator_decisions_failed_total"),
            commands_processed_total: counter!("orchestrator_commands_processed_total"),
            active_workers: gauge!("orchestrator_active_workers"),
            busy_workers: gauge!("orchestrator_busy_workers"),
            registered_agents: gauge!("orchestrator_registered_agents"),
        }
    }

    // 任务

    pub fn record_task_enqueued(&self, priority: TaskPriority) {
        counter!("orchestrator_tasks_enqueued_total", "priority" => priority.as_str()).increment(1);
    }

    pub fn record_task_dequeued(&self) {
        self.tasks_dequeued_total.increment(1);
    }

    pub fn record_task_requeued(&self) {
        self.tasks_requeued_total.increment(1);
    }

    pub fn record_task_dead_lettered(&self) {
        self.tasks_dead_lettered_total.increment(1);
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed_total.increment(1);
    }

    pub fn record_mirror_error(&self) {
        self.mirror_errors_total.increment(1);
    }

    /// 按任务名记录一次执行结果：success / failure / retry / revoked
    pub fn record_task_execution(&self, task_name: &str, outcome: &'static str) {
        counter!(
            "orchestrator_task_executions_total",
            "task_name" => task_name.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_task_duration(&self, task_name: &str, seconds: f64) {
        histogram!("orchestrator_task_duration_seconds", "task_name" => task_name.to_string())
            .record(seconds);
    }

    pub fn update_queue_depth(&self, priority: TaskPriority, depth: usize) {
        gauge!("orchestrator_queue_depth", "priority" => priority.as_str()).set(depth as f64);
    }

    // Worker

    pub fn update_worker_counts(&self, active: usize, busy: usize) {
        self.active_workers.set(active as f64);
        self.busy_workers.set(busy as f64);
    }

    pub fn record_worker_restart(&self) {
        self.worker_restarts_total.increment(1);
    }

    // Agent / 决策

    pub fn update_registered_agents(&self, count: usize) {
        self.registered_agents.set(count as f64);
    }

    pub fn record_decision(&self, success: bool) {
        if success {
            self.decisions_executed_total.increment(1);
        } else {
            self.decisions_failed_total.increment(1);
        }
    }

    pub fn record_command_processed(&self, command_type: &str, success: bool) {
        self.commands_processed_total.increment(1);
        counter!(
            "orchestrator_commands_total",
            "command_type" => command_type.to_string(),
            "status" => if success { "completed" } else { "failed" }
        )
        .increment(1);
    }
}
