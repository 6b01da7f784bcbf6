use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    models::{Task, TaskPriority},
    OrchestratorResult,
};

/// 任务持久化镜像
///
/// 就绪任务按优先级档位写入有序集合 (`queue:<band>`)，等待依赖的任务写入
/// `pending_tasks` 哈希。镜像只用于崩溃恢复，正常出队从不读取它。
#[async_trait]
pub trait TaskMirror: Send + Sync {
    /// 写入就绪任务
    async fn mirror_ready(&self, task: &Task) -> OrchestratorResult<()>;

    /// 删除就绪任务
    async fn remove_ready(&self, task: &Task) -> OrchestratorResult<()>;

    /// 写入等待依赖的任务
    async fn mirror_pending(&self, task: &Task) -> OrchestratorResult<()>;

    /// 删除等待依赖的任务
    async fn remove_pending(&self, task_id: &str) -> OrchestratorResult<()>;

    /// 清空某个档位，`None` 表示全部档位
    async fn clear_ready(&self, priority: Option<TaskPriority>) -> OrchestratorResult<()>;

    /// 读取所有就绪任务（恢复用）
    async fn load_ready(&self) -> OrchestratorResult<Vec<Task>>;

    /// 读取所有等待依赖的任务（恢复用）
    async fn load_pending(&self) -> OrchestratorResult<Vec<Task>>;

    /// 各档位的任务数
    async fn band_sizes(&self) -> OrchestratorResult<BTreeMap<TaskPriority, usize>>;
}
