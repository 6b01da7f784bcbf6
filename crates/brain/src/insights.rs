//! 从Agent消息中积累的运行洞察
//!
//! 完成耗时、错误模式、性能指标按Agent类型分别统计，供优化周期构建系统状态。

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{AgentMessage, AgentMessageKind};

const COMPLETION_SAMPLES: usize = 1000;
const PERFORMANCE_SAMPLES: usize = 100;
/// 错误次数超过该值视为频繁错误
pub const FREQUENT_ERROR_THRESHOLD: u64 = 10;
const SEVERE_ERROR_THRESHOLD: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// 最近5个样本与之前5个样本的均值对比，±20% 以内视为平稳
pub fn completion_trend(values: &[f64]) -> CompletionTrend {
    if values.len() < 5 {
        return CompletionTrend::Stable;
    }
    let recent = &values[values.len() - 5..];
    let older = if values.len() >= 10 {
        &values[values.len() - 10..values.len() - 5]
    } else {
        &values[..5]
    };
    let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
    let older_avg = older.iter().sum::<f64>() / older.len() as f64;

    if recent_avg > older_avg * 1.2 {
        CompletionTrend::Increasing
    } else if recent_avg < older_avg * 0.8 {
        CompletionTrend::Decreasing
    } else {
        CompletionTrend::Stable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub avg_completion_time: f64,
    pub task_count: usize,
    pub recent_trend: CompletionTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub agent_type: String,
    pub error_type: String,
    pub count: u64,
    pub severe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub metrics: Value,
}

#[derive(Debug, Default)]
pub struct Insights {
    completion_times: BTreeMap<String, VecDeque<f64>>,
    /// (agent_type, error_type) -> 次数
    error_patterns: BTreeMap<(String, String), u64>,
    performance: BTreeMap<String, VecDeque<PerformanceSample>>,
    results_by_type: BTreeMap<String, u64>,
    errors_by_type: BTreeMap<String, u64>,
    total_tasks_processed: u64,
}

impl Insights {
    pub fn observe(&mut self, message: &AgentMessage) {
        let agent_type = message.agent_type.clone();
        match message.message_type {
            AgentMessageKind::Result => {
                if let Some(duration) = message.content_f64("duration") {
                    let times = self.completion_times.entry(agent_type.clone()).or_default();
                    times.push_back(duration);
                    if times.len() > COMPLETION_SAMPLES {
                        times.pop_front();
                    }
                }
                *self.results_by_type.entry(agent_type).or_default() += 1;
                self.total_tasks_processed += 1;
            }
            AgentMessageKind::Error => {
                let error_type = message
                    .content
                    .get("error_type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                *self
                    .error_patterns
                    .entry((agent_type.clone(), error_type))
                    .or_default() += 1;
                *self.errors_by_type.entry(agent_type).or_default() += 1;
            }
            AgentMessageKind::Metric => {
                let samples = self.performance.entry(agent_type).or_default();
                samples.push_back(PerformanceSample {
                    timestamp: message.timestamp,
                    metrics: message.content.clone(),
                });
                if samples.len() > PERFORMANCE_SAMPLES {
                    samples.pop_front();
                }
            }
            _ => {}
        }
    }

    pub fn total_tasks_processed(&self) -> u64 {
        self.total_tasks_processed
    }

    pub fn results_by_type(&self) -> &BTreeMap<String, u64> {
        &self.results_by_type
    }

    pub fn agent_performance(&self) -> BTreeMap<String, AgentPerformance> {
        self.completion_times
            .iter()
            .filter(|(_, times)| !times.is_empty())
            .map(|(agent_type, times)| {
                let values: Vec<f64> = times.iter().copied().collect();
                (
                    agent_type.clone(),
                    AgentPerformance {
                        avg_completion_time: values.iter().sum::<f64>() / values.len() as f64,
                        task_count: values.len(),
                        recent_trend: completion_trend(&values),
                    },
                )
            })
            .collect()
    }

    /// 超过阈值的错误模式
    pub fn frequent_errors(&self) -> Vec<ErrorPattern> {
        self.error_patterns
            .iter()
            .filter(|(_, count)| **count > FREQUENT_ERROR_THRESHOLD)
            .map(|((agent_type, error_type), count)| ErrorPattern {
                agent_type: agent_type.clone(),
                error_type: error_type.clone(),
                count: *count,
                severe: *count > SEVERE_ERROR_THRESHOLD,
            })
            .collect()
    }

    /// 已据此做出决策的错误模式重新计数
    pub fn reset_error_pattern(&mut self, agent_type: &str, error_type: &str) {
        self.error_patterns
            .remove(&(agent_type.to_string(), error_type.to_string()));
    }

    pub fn performance_samples(&self, agent_type: &str) -> Vec<PerformanceSample> {
        self.performance
            .get(agent_type)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 各Agent类型的平均完成耗时
    pub fn latencies(&self) -> BTreeMap<String, f64> {
        self.agent_performance()
            .into_iter()
            .map(|(agent_type, perf)| (agent_type, perf.avg_completion_time))
            .collect()
    }

    pub fn error_rates(&self) -> BTreeMap<String, f64> {
        let mut rates = BTreeMap::new();
        for (agent_type, errors) in &self.errors_by_type {
            let results = self.results_by_type.get(agent_type).copied().unwrap_or(0);
            let total = results + errors;
            if total > 0 {
                rates.insert(agent_type.clone(), *errors as f64 / total as f64);
            }
        }
        rates
    }

    pub fn overall_error_rate(&self) -> f64 {
        let errors: u64 = self.errors_by_type.values().sum();
        let total = errors + self.results_by_type.values().sum::<u64>();
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        }
    }

    pub fn avg_latency(&self) -> f64 {
        let (sum, count) = self
            .completion_times
            .values()
            .flatten()
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(agent_type: &str, duration: f64) -> AgentMessage {
        AgentMessage::new("a-1", agent_type, AgentMessageKind::Result, json!({"duration": duration}))
    }

    #[test]
    fn test_trend_detection() {
        assert_eq!(completion_trend(&[1.0, 2.0, 3.0]), CompletionTrend::Stable);
        let slowing = [1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        assert_eq!(completion_trend(&slowing), CompletionTrend::Increasing);
        let faster = [2.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(completion_trend(&faster), CompletionTrend::Decreasing);
    }

    #[test]
    fn test_error_patterns_and_rates() {
        let mut insights = Insights::default();
        for _ in 0..11 {
            insights.observe(&AgentMessage::new(
                "b-1",
                "backend",
                AgentMessageKind::Error,
                json!({"error_type": "timeout"}),
            ));
        }
        insights.observe(&AgentMessage::new("b-1", "backend", AgentMessageKind::Error, json!({})));
        for _ in 0..4 {
            insights.observe(&result("backend", 2.0));
        }

        let frequent = insights.frequent_errors();
        assert_eq!(frequent.len(), 1);
        assert_eq!(frequent[0].error_type, "timeout");
        assert!(!frequent[0].severe);
        assert!((insights.error_rates()["backend"] - 0.75).abs() < 1e-9);
        assert_eq!(insights.total_tasks_processed(), 4);

        insights.reset_error_pattern("backend", "timeout");
        assert!(insights.frequent_errors().is_empty());
    }

    #[test]
    fn test_latencies_per_agent_type() {
        let mut insights = Insights::default();
        insights.observe(&result("qa", 1.0));
        insights.observe(&result("qa", 3.0));
        insights.observe(&result("devops", 6.0));
        // 没有耗时的结果只计数
        insights.observe(&AgentMessage::new("q", "qa", AgentMessageKind::Result, json!({})));

        assert_eq!(insights.latencies()["qa"], 2.0);
        assert!((insights.avg_latency() - 10.0 / 3.0).abs() < 1e-9);
        assert_eq!(insights.results_by_type()["qa"], 3);
    }
}
