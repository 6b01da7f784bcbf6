pub mod in_memory_mirror;
pub mod observability;
pub mod redis_mirror;

pub use in_memory_mirror::InMemoryTaskMirror;
pub use observability::{install_prometheus_exporter, MetricsCollector};
pub use redis_mirror::{RedisConnectionManager, RedisTaskMirror};

use std::sync::Arc;

use orchestrator_core::{
    config::{PersistenceBackend, PersistenceConfig},
    OrchestratorResult, TaskMirror,
};
use tracing::info;

/// 按配置创建任务镜像
pub async fn create_task_mirror(config: &PersistenceConfig) -> OrchestratorResult<Arc<dyn TaskMirror>> {
    match config.backend {
        PersistenceBackend::Memory => {
            info!("使用内存任务镜像");
            Ok(Arc::new(InMemoryTaskMirror::new()))
        }
        PersistenceBackend::Redis => {
            let manager = RedisConnectionManager::new(config.redis.clone()).await?;
            info!(
                "使用Redis任务镜像: {}:{}/{}",
                config.redis.host, config.redis.port, config.redis.database
            );
            Ok(Arc::new(RedisTaskMirror::new(manager)))
        }
    }
}
