//! 反馈闭环
//!
//! 反馈先进入待处理队列，`process_feedback` 批量取出后：
//! 1. 按顺序匹配规则，每条规则各自冷却；
//! 2. 更新 (来源, 类型) 的滚动窗口，最近10条的平均影响低于 -0.3 时
//!    产生 `repeated_negative_feedback` 模式动作。

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::OrchestratorResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analytics::{labels, AnalyticsCollector};

const PATTERN_WINDOW: usize = 100;
const PATTERN_SAMPLE: usize = 10;
const NEGATIVE_PATTERN_THRESHOLD: f64 = -0.3;
const HISTORY_LIMIT: usize = 10_000;

pub const PATTERN_DETECTED: &str = "pattern_detected";
pub const REPEATED_NEGATIVE_FEEDBACK: &str = "repeated_negative_feedback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub source: String,
    pub feedback_type: String,
    pub data: Value,
    /// [-1, 1]，负数表示不利影响
    pub impact_score: f64,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    pub action_taken: Option<String>,
}

/// 规则条件；返回错误时该规则对本条反馈视为未命中
pub type FeedbackCondition = Arc<dyn Fn(&FeedbackEntry) -> OrchestratorResult<bool> + Send + Sync>;

#[derive(Clone)]
pub struct FeedbackRule {
    pub name: String,
    pub condition: FeedbackCondition,
    pub action: String,
    pub cooldown: Duration,
    pub last_triggered: Option<DateTime<Utc>>,
}

impl FeedbackRule {
    pub fn new<F>(name: impl Into<String>, condition: F, action: impl Into<String>, cooldown: Duration) -> Self
    where
        F: Fn(&FeedbackEntry) -> OrchestratorResult<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            action: action.into(),
            cooldown,
            last_triggered: None,
        }
    }

    fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered.is_some_and(|t| now - t < self.cooldown)
    }
}

impl std::fmt::Debug for FeedbackRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("cooldown", &self.cooldown)
            .field("last_triggered", &self.last_triggered)
            .finish()
    }
}

fn default_rules() -> Vec<FeedbackRule> {
    vec![
        FeedbackRule::new(
            "high_error_rate",
            |f: &FeedbackEntry| Ok(f.feedback_type == "error" && f.impact_score < -0.5),
            "reduce_load",
            Duration::minutes(5),
        ),
        FeedbackRule::new(
            "slow_performance",
            |f: &FeedbackEntry| {
                let latency = f.data.get("latency").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(f.feedback_type == "performance" && latency > 5.0)
            },
            "scale_up",
            Duration::minutes(2),
        ),
        FeedbackRule::new(
            "consistent_success",
            |f: &FeedbackEntry| Ok(f.feedback_type == "success" && f.impact_score > 0.8),
            "maintain_or_scale_down",
            Duration::minutes(10),
        ),
        FeedbackRule::new(
            "task_completion_failure",
            |f: &FeedbackEntry| Ok(f.feedback_type == "task_failure"),
            "retry_with_adjustment",
            Duration::seconds(30),
        ),
    ]
}

/// 规则或模式产生的待执行动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAction {
    pub action_type: String,
    /// 触发的规则名或模式名
    pub trigger: String,
    pub source: String,
    pub feedback_type: String,
    pub parameters: Value,
    pub timestamp: DateTime<Utc>,
}

fn action_parameters(action_type: &str, entry: &FeedbackEntry) -> Value {
    match action_type {
        "reduce_load" => json!({"rate_limit_reduction": 0.5, "target": entry.source}),
        "scale_up" => json!({"worker_increase": 1, "target": entry.source}),
        "maintain_or_scale_down" => json!({
            "worker_decrease": 1,
            "target": entry.source,
            "condition": "if_utilization_below_50_percent",
        }),
        "retry_with_adjustment" => json!({
            "retry": true,
            "priority_boost": 1,
            "task_data": entry.data,
        }),
        _ => json!({"target": entry.source}),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
    InsufficientData,
}

/// 最近5条与之前5条的均值差超过 ±0.1 视为趋势变化
pub fn calculate_trend(values: &[f64]) -> Trend {
    if values.len() < 5 {
        return Trend::InsufficientData;
    }
    let recent = &values[values.len() - 5..];
    let older = if values.len() >= 10 {
        &values[values.len() - 10..values.len() - 5]
    } else {
        &values[..5]
    };
    let diff = mean(recent) - mean(older);
    if diff > 0.1 {
        Trend::Improving
    } else if diff < -0.1 {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[derive(Debug, Clone)]
struct PatternWindow {
    count: u64,
    recent_impacts: VecDeque<f64>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl PatternWindow {
    fn recent_average(&self, n: usize) -> Option<f64> {
        if self.recent_impacts.len() < n {
            return None;
        }
        let tail: Vec<f64> = self.recent_impacts.iter().rev().take(n).copied().collect();
        Some(mean(&tail))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub total_count: u64,
    pub avg_recent_impact: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub count: usize,
    pub avg_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub total_feedback: usize,
    pub by_type: BTreeMap<String, TypeSummary>,
    pub avg_impact: f64,
    pub positive_ratio: f64,
    pub actions_taken: usize,
}

#[derive(Debug)]
struct LoopState {
    rules: Vec<FeedbackRule>,
    patterns: BTreeMap<(String, String), PatternWindow>,
    history: VecDeque<FeedbackEntry>,
}

pub struct FeedbackLoop {
    analytics: Arc<AnalyticsCollector>,
    queue: Mutex<Vec<FeedbackEntry>>,
    state: Mutex<LoopState>,
}

impl FeedbackLoop {
    pub fn new(analytics: Arc<AnalyticsCollector>) -> Self {
        Self {
            analytics,
            queue: Mutex::new(Vec::new()),
            state: Mutex::new(LoopState {
                rules: default_rules(),
                patterns: BTreeMap::new(),
                history: VecDeque::new(),
            }),
        }
    }

    pub fn analytics(&self) -> &Arc<AnalyticsCollector> {
        &self.analytics
    }

    /// 提交反馈，影响分值截断到 [-1, 1]
    pub async fn submit_feedback(&self, source: &str, feedback_type: &str, data: Value, impact_score: f64) {
        let impact_score = if impact_score.is_finite() {
            impact_score.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self.queue.lock().await.push(FeedbackEntry {
            source: source.to_string(),
            feedback_type: feedback_type.to_string(),
            data,
            impact_score,
            timestamp: Utc::now(),
            processed: false,
            action_taken: None,
        });

        self.analytics
            .increment_counter(
                &format!("feedback_{feedback_type}_count"),
                1.0,
                labels([("source", source)]),
            )
            .await;
        if impact_score != 0.0 {
            self.analytics
                .observe_histogram(
                    "feedback_impact_score",
                    impact_score,
                    labels([("source", source), ("type", feedback_type)]),
                )
                .await;
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// 处理全部待处理反馈，返回需要执行的动作
    ///
    /// 模式检测只针对本批次出现过的 (来源, 类型)。
    pub async fn process_feedback(&self) -> Vec<FeedbackAction> {
        let pending = std::mem::take(&mut *self.queue.lock().await);
        if pending.is_empty() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let mut touched = BTreeSet::new();
        let mut state = self.state.lock().await;

        for mut entry in pending {
            let now = Utc::now();
            for rule in state.rules.iter_mut() {
                if rule.cooling_down(now) {
                    continue;
                }
                let hit = match (rule.condition)(&entry) {
                    Ok(hit) => hit,
                    Err(e) => {
                        warn!("反馈规则 {} 执行失败: {}", rule.name, e);
                        false
                    }
                };
                if !hit {
                    continue;
                }
                debug!("反馈规则 {} 命中: {}:{}", rule.name, entry.source, entry.feedback_type);
                actions.push(FeedbackAction {
                    action_type: rule.action.clone(),
                    trigger: rule.name.clone(),
                    source: entry.source.clone(),
                    feedback_type: entry.feedback_type.clone(),
                    parameters: action_parameters(&rule.action, &entry),
                    timestamp: now,
                });
                entry.processed = true;
                entry.action_taken = Some(rule.action.clone());
                rule.last_triggered = Some(now);
            }

            let key = (entry.source.clone(), entry.feedback_type.clone());
            let window = state.patterns.entry(key.clone()).or_insert_with(|| PatternWindow {
                count: 0,
                recent_impacts: VecDeque::new(),
                first_seen: entry.timestamp,
                last_seen: entry.timestamp,
            });
            window.count += 1;
            window.recent_impacts.push_back(entry.impact_score);
            if window.recent_impacts.len() > PATTERN_WINDOW {
                window.recent_impacts.pop_front();
            }
            window.last_seen = entry.timestamp;
            touched.insert(key);

            state.history.push_back(entry);
            if state.history.len() > HISTORY_LIMIT {
                state.history.pop_front();
            }
        }

        for key in touched {
            let Some(window) = state.patterns.get(&key) else {
                continue;
            };
            let Some(avg_impact) = window.recent_average(PATTERN_SAMPLE) else {
                continue;
            };
            if avg_impact < NEGATIVE_PATTERN_THRESHOLD {
                let (source, feedback_type) = key;
                info!(
                    "检测到持续负面反馈: {}:{} 平均影响 {:.2}",
                    source, feedback_type, avg_impact
                );
                actions.push(FeedbackAction {
                    action_type: PATTERN_DETECTED.to_string(),
                    trigger: REPEATED_NEGATIVE_FEEDBACK.to_string(),
                    parameters: json!({
                        "avg_impact": avg_impact,
                        "count": window.count,
                        "investigation_required": true,
                        "suggested_action": "review_agent_implementation",
                    }),
                    source,
                    feedback_type,
                    timestamp: Utc::now(),
                });
            }
        }

        actions
    }

    pub async fn add_rule(&self, rule: FeedbackRule) {
        self.state.lock().await.rules.push(rule);
    }

    pub async fn rule_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .rules
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// 按 `来源:类型` 组织的模式摘要
    pub async fn get_patterns(&self) -> BTreeMap<String, PatternSummary> {
        let state = self.state.lock().await;
        state
            .patterns
            .iter()
            .map(|((source, feedback_type), window)| {
                let impacts: Vec<f64> = window.recent_impacts.iter().copied().collect();
                let recent = &impacts[impacts.len().saturating_sub(PATTERN_SAMPLE)..];
                (
                    format!("{source}:{feedback_type}"),
                    PatternSummary {
                        total_count: window.count,
                        avg_recent_impact: mean(recent),
                        first_seen: window.first_seen,
                        last_seen: window.last_seen,
                        trend: calculate_trend(&impacts),
                    },
                )
            })
            .collect()
    }

    /// 已处理反馈的摘要，没有数据时返回 `None`
    pub async fn get_feedback_summary(&self, since: Option<DateTime<Utc>>) -> Option<FeedbackSummary> {
        let state = self.state.lock().await;
        let entries: Vec<&FeedbackEntry> = state
            .history
            .iter()
            .filter(|f| since.map_or(true, |s| f.timestamp >= s))
            .collect();
        if entries.is_empty() {
            return None;
        }

        let total = entries.len() as f64;
        let mut by_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for entry in &entries {
            by_type
                .entry(entry.feedback_type.clone())
                .or_default()
                .push(entry.impact_score);
        }

        Some(FeedbackSummary {
            total_feedback: entries.len(),
            avg_impact: entries.iter().map(|f| f.impact_score).sum::<f64>() / total,
            positive_ratio: entries.iter().filter(|f| f.impact_score > 0.0).count() as f64 / total,
            actions_taken: entries.iter().filter(|f| f.processed).count(),
            by_type: by_type
                .into_iter()
                .map(|(feedback_type, impacts)| {
                    (
                        feedback_type,
                        TypeSummary {
                            count: impacts.len(),
                            avg_impact: mean(&impacts),
                        },
                    )
                })
                .collect(),
        })
    }

    /// 清除历史，`older_than` 为空时全部清除；返回清除数量
    pub async fn clear_history(&self, older_than: Option<Duration>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.history.len();
        match older_than {
            Some(age) => {
                let cutoff = Utc::now() - age;
                state.history.retain(|f| f.timestamp >= cutoff);
            }
            None => state.history.clear(),
        }
        before - state.history.len()
    }
}
