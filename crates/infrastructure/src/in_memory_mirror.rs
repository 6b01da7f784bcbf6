use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use orchestrator_core::{
    models::{Task, TaskPriority},
    OrchestratorResult, TaskMirror,
};

/// 进程内任务镜像
///
/// 不具备崩溃恢复能力，用于单机运行与测试。
#[derive(Debug, Default)]
pub struct InMemoryTaskMirror {
    ready: RwLock<BTreeMap<TaskPriority, HashMap<String, Task>>>,
    pending: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains_ready(&self, task_id: &str) -> bool {
        self.ready
            .read()
            .await
            .values()
            .any(|band| band.contains_key(task_id))
    }

    pub async fn contains_pending(&self, task_id: &str) -> bool {
        self.pending.read().await.contains_key(task_id)
    }
}

#[async_trait]
impl TaskMirror for InMemoryTaskMirror {
    async fn mirror_ready(&self, task: &Task) -> OrchestratorResult<()> {
        let mut ready = self.ready.write().await;
        // 优先级变更后旧档位中的条目需要移除
        for band in ready.values_mut() {
            band.remove(&task.id);
        }
        ready
            .entry(task.priority)
            .or_default()
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn remove_ready(&self, task: &Task) -> OrchestratorResult<()> {
        let mut ready = self.ready.write().await;
        for band in ready.values_mut() {
            band.remove(&task.id);
        }
        Ok(())
    }

    async fn mirror_pending(&self, task: &Task) -> OrchestratorResult<()> {
        self.pending
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn remove_pending(&self, task_id: &str) -> OrchestratorResult<()> {
        self.pending.write().await.remove(task_id);
        Ok(())
    }

    async fn clear_ready(&self, priority: Option<TaskPriority>) -> OrchestratorResult<()> {
        let mut ready = self.ready.write().await;
        match priority {
            Some(priority) => {
                ready.remove(&priority);
            }
            None => ready.clear(),
        }
        Ok(())
    }

    async fn load_ready(&self) -> OrchestratorResult<Vec<Task>> {
        Ok(self
            .ready
            .read()
            .await
            .values()
            .flat_map(|band| band.values().cloned())
            .collect())
    }

    async fn load_pending(&self) -> OrchestratorResult<Vec<Task>> {
        Ok(self.pending.read().await.values().cloned().collect())
    }

    async fn band_sizes(&self) -> OrchestratorResult<BTreeMap<TaskPriority, usize>> {
        let ready = self.ready.read().await;
        Ok(TaskPriority::ALL
            .iter()
            .map(|p| (*p, ready.get(p).map_or(0, HashMap::len)))
            .collect())
    }
}
