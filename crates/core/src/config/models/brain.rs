use serde::{Deserialize, Serialize};

/// 主控大脑配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub optimization_interval_seconds: u64,
    pub feedback_interval_seconds: u64,
    /// 置信度不低于该值的决策自动执行，否则进入人工审核队列
    pub auto_execute_confidence: f64,
    pub aggregation_interval_seconds: u64,
    pub metric_retention_hours: u64,
    /// 已结束的任务执行记录保留时间
    pub execution_retention_hours: u64,
    pub optimization_strategy: String,
    pub decision_history_limit: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            optimization_interval_seconds: 60,
            feedback_interval_seconds: 30,
            auto_execute_confidence: 0.9,
            aggregation_interval_seconds: 300, // 聚合最多每5分钟刷新一次
            metric_retention_hours: 24,
            execution_retention_hours: 24,
            optimization_strategy: "load_balance".to_string(),
            decision_history_limit: 1000,
        }
    }
}

pub const OPTIMIZATION_STRATEGIES: [&str; 6] = [
    "load_balance",
    "priority_based",
    "deadline_driven",
    "cost_optimized",
    "throughput_maximized",
    "latency_minimized",
];

impl BrainConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.auto_execute_confidence) {
            return Err(anyhow::anyhow!("自动执行置信度必须在0.0到1.0之间"));
        }
        if self.optimization_interval_seconds == 0 || self.feedback_interval_seconds == 0 {
            return Err(anyhow::anyhow!("优化与反馈周期必须大于0"));
        }
        if !OPTIMIZATION_STRATEGIES.contains(&self.optimization_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的优化策略: {}，支持的策略: {:?}",
                self.optimization_strategy,
                OPTIMIZATION_STRATEGIES
            ));
        }
        Ok(())
    }
}
