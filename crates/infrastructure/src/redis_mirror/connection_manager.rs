use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Client;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use orchestrator_core::{config::RedisConfig, OrchestratorError, OrchestratorResult};

/// Redis连接管理
///
/// 建立连接时按配置重试；建立后由 `ConnectionManager` 负责断线重连。
#[derive(Clone)]
pub struct RedisConnectionManager {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisConnectionManager {
    pub async fn new(config: RedisConfig) -> OrchestratorResult<Self> {
        let client = Client::open(config.build_connection_url())
            .map_err(|e| OrchestratorError::Persistence(format!("创建Redis客户端失败: {e}")))?;

        let connection = Self::connect_with_retry(&client, &config).await?;
        let manager = Self { connection, config };
        manager.ping().await?;
        debug!(
            "已连接到Redis {}:{}",
            manager.config.host, manager.config.port
        );

        Ok(manager)
    }

    async fn connect_with_retry(
        client: &Client,
        config: &RedisConfig,
    ) -> OrchestratorResult<ConnectionManager> {
        let attempts = config.max_retry_attempts.max(1);
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut last_error = String::from("unknown");

        for attempt in 1..=attempts {
            match timeout(connect_timeout, ConnectionManager::new(client.clone())).await {
                Ok(Ok(connection)) => {
                    if attempt > 1 {
                        debug!("第 {} 次尝试后成功连接Redis", attempt);
                    }
                    return Ok(connection);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("连接超时 ({}s)", config.connection_timeout_seconds),
            }

            if attempt < attempts {
                warn!(
                    "连接Redis失败 ({}/{}): {}，{}秒后重试",
                    attempt, attempts, last_error, config.retry_delay_seconds
                );
                sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        let message = format!("连接Redis失败，已重试 {attempts} 次: {last_error}");
        error!("{}", message);
        Err(OrchestratorError::Persistence(message))
    }

    /// 获取连接句柄（克隆开销很小）
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub async fn ping(&self) -> OrchestratorResult<()> {
        let mut conn = self.connection();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| OrchestratorError::Persistence(format!("Redis PING失败: {e}")))?;
        if response != "PONG" {
            return Err(OrchestratorError::Persistence(format!(
                "Redis PING返回异常: {response}"
            )));
        }
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis健康检查失败: {}", e);
                false
            }
        }
    }
}
