use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::OrchestratorResult;

/// 发送给Worker进程的信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// 优雅停止 (SIGTERM)
    Terminate,
    /// 强制终止 (SIGKILL)
    Kill,
}

/// 进程退出信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

/// 启动Worker所需的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpawnSpec {
    pub worker_id: String,
    pub queue: String,
    pub concurrency: u32,
}

/// Worker执行体抽象
///
/// 一个实例绑定一个命名队列。存活性只通过进程是否退出来判断。
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// 操作系统进程号（若有）
    fn pid(&self) -> Option<u32>;

    /// 发送信号
    async fn signal(&mut self, signal: ProcessSignal) -> OrchestratorResult<()>;

    /// 非阻塞地检查是否已退出
    fn try_wait(&mut self) -> OrchestratorResult<Option<ProcessExit>>;

    /// 等待进程退出
    async fn wait(&mut self) -> OrchestratorResult<ProcessExit>;
}

/// Worker执行体的启动器，可替换为进程、容器或线程实现
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, spec: &WorkerSpawnSpec) -> OrchestratorResult<Box<dyn WorkerProcess>>;
}
