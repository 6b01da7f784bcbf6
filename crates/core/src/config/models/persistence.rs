use serde::{Deserialize, Serialize};

/// 任务镜像存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Memory,
    Redis,
}

/// 持久化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    pub redis: RedisConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            redis: RedisConfig::default(),
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == PersistenceBackend::Redis {
            self.redis.validate()?;
        }
        Ok(())
    }
}

/// Redis连接配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 2,
            password: None,
            connection_timeout_seconds: 30,
            max_retry_attempts: 3,
            retry_delay_seconds: 1,
        }
    }
}

impl RedisConfig {
    /// 构建Redis连接URL
    pub fn build_connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }
        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }
        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库编号不能为负数"));
        }
        Ok(())
    }
}
