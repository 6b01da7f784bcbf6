use serde::{Deserialize, Serialize};

/// Agent协调器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub heartbeat_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub default_request_timeout_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 60, // 60秒无心跳判定为异常
            health_check_interval_seconds: 30,
            default_request_timeout_seconds: 30,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }
        Ok(())
    }
}
