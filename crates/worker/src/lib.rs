//! Worker池管理
//!
//! 每个命名队列对应一个Worker池，Worker是绑定到单个队列的外部执行体
//! (默认是操作系统进程)。[`WorkerPoolManager`] 负责启动、停止与扩缩容，
//! [`WorkerHealthChecker`] 负责存活检查与有限次数的自动重启。

pub mod health_checker;
pub mod pool;
pub mod pool_manager;
pub mod process;

pub use health_checker::{
    HealthCheck, HealthCheckKind, HealthReport, WorkerAlert, WorkerHealth, WorkerHealthChecker,
};
pub use pool::{ScaleDirection, WorkerPool};
pub use pool_manager::{WorkerLiveness, WorkerPoolManager};
pub use process::{OsProcessLauncher, OsWorkerProcess};
