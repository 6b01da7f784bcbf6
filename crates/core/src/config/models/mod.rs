pub mod api_observability;
pub mod app_config;
pub mod brain;
pub mod coordinator;
pub mod persistence;
pub mod scheduler;
pub mod worker_pool;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::{AppConfig, DEFAULT_CONFIG_PATHS};
pub use brain::{BrainConfig, OPTIMIZATION_STRATEGIES};
pub use coordinator::CoordinatorConfig;
pub use persistence::{PersistenceBackend, PersistenceConfig, RedisConfig};
pub use scheduler::{RetryPolicyConfig, SchedulerConfig};
pub use worker_pool::{LauncherConfig, PoolConfig, WorkerPoolConfig};
