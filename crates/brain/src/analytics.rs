//! 指标采集与聚合
//!
//! 各Agent上报的指标按名称保存原始数据点，聚合结果惰性计算：
//! 写入时最多每个聚合周期刷新一次，查询聚合时强制刷新。

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::config::BrainConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub computed_at: DateTime<Utc>,
}

impl Aggregation {
    /// 空序列返回 `None`
    pub fn compute(values: &[f64], computed_at: DateTime<Utc>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let avg = sum / count as f64;
        // 样本标准差
        let stddev = if count > 1 {
            let variance =
                sorted.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            count,
            sum,
            min: sorted[0],
            max: sorted[count - 1],
            avg,
            stddev,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            computed_at,
        })
    }
}

/// 线性插值百分位，`sorted` 必须非空且已排序
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let index = (sorted.len() - 1) as f64 * p / 100.0;
    let lower = index.floor() as usize;
    let upper = lower + 1;
    if upper >= sorted.len() {
        return sorted[sorted.len() - 1];
    }
    let weight = index - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

#[derive(Debug, Default)]
struct AnalyticsState {
    metrics: BTreeMap<String, Vec<MetricPoint>>,
    aggregations: BTreeMap<String, Aggregation>,
}

impl AnalyticsState {
    fn aggregate(&mut self, name: &str, now: DateTime<Utc>) -> Option<Aggregation> {
        let values: Vec<f64> = self
            .metrics
            .get(name)
            .map(|points| points.iter().map(|m| m.value).collect())
            .unwrap_or_default();
        match Aggregation::compute(&values, now) {
            Some(aggregation) => {
                self.aggregations.insert(name.to_string(), aggregation.clone());
                Some(aggregation)
            }
            None => {
                self.aggregations.remove(name);
                None
            }
        }
    }
}

pub struct AnalyticsCollector {
    state: RwLock<AnalyticsState>,
    aggregation_interval: Duration,
    retention: Duration,
}

impl Default for AnalyticsCollector {
    fn default() -> Self {
        Self::new(Duration::minutes(5), Duration::hours(24))
    }
}

impl AnalyticsCollector {
    pub fn new(aggregation_interval: Duration, retention: Duration) -> Self {
        Self {
            state: RwLock::new(AnalyticsState::default()),
            aggregation_interval,
            retention,
        }
    }

    pub fn from_config(config: &BrainConfig) -> Self {
        Self::new(
            Duration::seconds(config.aggregation_interval_seconds as i64),
            Duration::hours(config.metric_retention_hours as i64),
        )
    }

    pub async fn record_metric(
        &self,
        name: &str,
        value: f64,
        kind: MetricKind,
        labels: BTreeMap<String, String>,
    ) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.metrics.entry(name.to_string()).or_default().push(MetricPoint {
            name: name.to_string(),
            value,
            kind,
            labels,
            timestamp: now,
        });

        let stale = state
            .aggregations
            .get(name)
            .map_or(true, |a| now - a.computed_at > self.aggregation_interval);
        if stale {
            state.aggregate(name, now);
        }
    }

    pub async fn increment_counter(&self, name: &str, value: f64, labels: BTreeMap<String, String>) {
        self.record_metric(name, value, MetricKind::Counter, labels).await;
    }

    pub async fn set_gauge(&self, name: &str, value: f64, labels: BTreeMap<String, String>) {
        self.record_metric(name, value, MetricKind::Gauge, labels).await;
    }

    pub async fn observe_histogram(&self, name: &str, value: f64, labels: BTreeMap<String, String>) {
        self.record_metric(name, value, MetricKind::Histogram, labels).await;
    }

    pub async fn get_metrics(&self, name: &str, since: Option<DateTime<Utc>>) -> Vec<MetricPoint> {
        let state = self.state.read().await;
        state
            .metrics
            .get(name)
            .map(|points| {
                points
                    .iter()
                    .filter(|m| since.map_or(true, |s| m.timestamp >= s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 强制刷新后返回聚合结果
    pub async fn get_aggregation(&self, name: &str) -> Option<Aggregation> {
        self.state.write().await.aggregate(name, Utc::now())
    }

    /// 上一次计算的聚合结果，不触发刷新
    pub async fn cached_aggregation(&self, name: &str) -> Option<Aggregation> {
        self.state.read().await.aggregations.get(name).cloned()
    }

    pub async fn get_all_aggregations(&self) -> BTreeMap<String, Aggregation> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let names: Vec<String> = state.metrics.keys().cloned().collect();
        for name in &names {
            state.aggregate(name, now);
        }
        state.aggregations.clone()
    }

    pub async fn metric_names(&self) -> Vec<String> {
        self.state.read().await.metrics.keys().cloned().collect()
    }

    /// 删除超过保留期的数据点，返回删除数量
    pub async fn cleanup_old_metrics(&self) -> usize {
        self.cleanup_old_metrics_at(Utc::now()).await
    }

    pub async fn cleanup_old_metrics_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut state = self.state.write().await;
        let mut removed = 0;
        for points in state.metrics.values_mut() {
            let before = points.len();
            points.retain(|m| m.timestamp >= cutoff);
            removed += before - points.len();
        }
        state.metrics.retain(|_, points| !points.is_empty());
        let names: Vec<String> = state.aggregations.keys().cloned().collect();
        for name in names {
            state.aggregate(&name, now);
        }
        if removed > 0 {
            debug!("清理过期指标数据点: {}", removed);
        }
        removed
    }
}

/// 单标签的便捷构造
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
