use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    brain::BrainConfig,
    coordinator::CoordinatorConfig,
    persistence::PersistenceConfig,
    scheduler::SchedulerConfig,
    worker_pool::WorkerPoolConfig,
};

/// 默认配置文件路径，按顺序查找
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/orchestrator.toml",
    "orchestrator.toml",
    "/etc/orchestrator/config.toml",
];

/// 系统配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub worker_pool: WorkerPoolConfig,
    pub coordinator: CoordinatorConfig,
    pub brain: BrainConfig,
    pub persistence: PersistenceConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. 配置文件（TOML）
    /// 3. 环境变量覆盖，例如 `ORCHESTRATOR_SCHEDULER__DEFAULT_MAX_RETRIES=5`
    ///
    /// 显式指定的配置文件不存在时返回错误；未指定时依次尝试默认路径，
    /// 都不存在则只使用内置默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.worker_pool
            .validate()
            .context("Worker池配置验证失败")?;
        self.coordinator
            .validate()
            .context("协调器配置验证失败")?;
        self.brain.validate().context("主控大脑配置验证失败")?;
        self.persistence
            .validate()
            .context("持久化配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceBackend;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert_eq!(config.worker_pool.pools.len(), 15);
        assert_eq!(config.brain.auto_execute_confidence, 0.9);
        assert_eq!(config.persistence.backend, PersistenceBackend::Memory);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [scheduler]
            default_max_retries = 5

            [brain]
            optimization_strategy = "cost_optimized"
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.default_max_retries, 5);
        assert_eq!(config.scheduler.retry.base_delay_seconds, 60);
        assert_eq!(config.brain.optimization_strategy, "cost_optimized");
        assert_eq!(config.coordinator.heartbeat_timeout_seconds, 60);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_toml(
            r#"
            [brain]
            auto_execute_confidence = 1.5
            "#,
        );
        assert!(err.is_err());

        let err = AppConfig::from_toml(
            r#"
            [[worker_pool.pools]]
            queue = "backend"
            min_workers = 4
            max_workers = 2
            "#,
        );
        assert!(err.is_err());

        let err = AppConfig::from_toml(
            r#"
            [observability]
            log_format = "xml"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [persistence]
            backend = "redis"

            [persistence.redis]
            host = "redis.internal"
            database = 4
            "#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.persistence.backend, PersistenceBackend::Redis);
        assert_eq!(
            config.persistence.redis.build_connection_url(),
            "redis://redis.internal:6379/4"
        );
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/orchestrator.toml")).is_err());
    }
}
