use chrono::{DateTime, Duration, Utc};

use orchestrator_core::config::RetryPolicyConfig;

/// 指数退避重试策略
///
/// 第 n 次重试（`retry_count = n`，从0开始）的基础间隔为
/// `base * multiplier^n`，上限为 `max`，再叠加 ±`jitter_factor` 的随机抖动，
/// 抖动后不低于 `base`。
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    pub fn new(config: Option<RetryPolicyConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
        }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// 不含抖动的退避间隔（秒）
    pub fn base_delay_seconds(&self, retry_count: u32) -> f64 {
        let base = self.config.base_delay_seconds as f64;
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let exponential = base * self.config.backoff_multiplier.powi(exponent);
        exponential.min(self.config.max_delay_seconds as f64)
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.config.base_delay_seconds as f64;
        let capped = self.base_delay_seconds(retry_count);

        // 抖动避免大量任务同时重试
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let seconds = (capped + jitter).max(base);

        Duration::milliseconds((seconds * 1000.0) as i64)
    }

    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for(retry_count)
    }
}
