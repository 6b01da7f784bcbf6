use serde::{Deserialize, Serialize};

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_max_retries: u32,
    pub dead_letter_capacity: usize,
    /// 保留的完成记录数，超出后淘汰最早完成的
    pub completed_capacity: usize,
    pub retry: RetryPolicyConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            dead_letter_capacity: 1000,
            completed_capacity: 10_000,
            retry: RetryPolicyConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dead_letter_capacity == 0 {
            return Err(anyhow::anyhow!("死信队列容量必须大于0"));
        }
        if self.completed_capacity == 0 {
            return Err(anyhow::anyhow!("完成记录容量必须大于0"));
        }
        self.retry.validate()
    }
}

/// 重试退避策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// 基础重试间隔（秒）
    pub base_delay_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_delay_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 60,  // 1分钟
            max_delay_seconds: 3600, // 1小时
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10%的随机抖动
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0.0到1.0之间"));
        }
        Ok(())
    }
}
