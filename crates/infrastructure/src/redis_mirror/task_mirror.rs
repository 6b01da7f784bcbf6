use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;

use orchestrator_core::{
    models::{Task, TaskPriority},
    OrchestratorError, OrchestratorResult, TaskMirror,
};

use super::connection_manager::RedisConnectionManager;

const READY_TASKS_KEY: &str = "ready_tasks";
const PENDING_TASKS_KEY: &str = "pending_tasks";

fn persistence_error(op: &str) -> impl Fn(redis::RedisError) -> OrchestratorError + '_ {
    move |e| OrchestratorError::Persistence(format!("Redis {op} 失败: {e}"))
}

/// 基于Redis有序集合的任务镜像
#[derive(Clone)]
pub struct RedisTaskMirror {
    manager: RedisConnectionManager,
}

impl RedisTaskMirror {
    pub fn new(manager: RedisConnectionManager) -> Self {
        Self { manager }
    }

    fn decode_all(values: Vec<String>, source: &str) -> Vec<Task> {
        values
            .into_iter()
            .filter_map(|raw| match serde_json::from_str::<Task>(&raw) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!("跳过无法解析的镜像任务 ({}): {}", source, e);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl TaskMirror for RedisTaskMirror {
    async fn mirror_ready(&self, task: &Task) -> OrchestratorResult<()> {
        let json = serde_json::to_string(task)?;
        let mut conn = self.manager.connection();
        let mut pipe = redis::pipe();
        pipe.atomic();
        // 优先级可能已变更，先从所有档位移除
        for band in TaskPriority::ALL {
            pipe.zrem(band.band_key(), &task.id).ignore();
        }
        pipe.zadd(
            task.priority.band_key(),
            &task.id,
            task.created_at.timestamp_millis(),
        )
        .ignore()
        .hset(READY_TASKS_KEY, &task.id, json)
        .ignore();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(persistence_error("ZADD"))
    }

    async fn remove_ready(&self, task: &Task) -> OrchestratorResult<()> {
        let mut conn = self.manager.connection();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for band in TaskPriority::ALL {
            pipe.zrem(band.band_key(), &task.id).ignore();
        }
        pipe.hdel(READY_TASKS_KEY, &task.id).ignore();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(persistence_error("ZREM"))
    }

    async fn mirror_pending(&self, task: &Task) -> OrchestratorResult<()> {
        let json = serde_json::to_string(task)?;
        let mut conn = self.manager.connection();
        let _: () = conn
            .hset(PENDING_TASKS_KEY, &task.id, json)
            .await
            .map_err(persistence_error("HSET"))?;
        Ok(())
    }

    async fn remove_pending(&self, task_id: &str) -> OrchestratorResult<()> {
        let mut conn = self.manager.connection();
        let _: () = conn
            .hdel(PENDING_TASKS_KEY, task_id)
            .await
            .map_err(persistence_error("HDEL"))?;
        Ok(())
    }

    async fn clear_ready(&self, priority: Option<TaskPriority>) -> OrchestratorResult<()> {
        let mut conn = self.manager.connection();
        let bands: Vec<TaskPriority> = match priority {
            Some(priority) => vec![priority],
            None => TaskPriority::ALL.to_vec(),
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        for band in bands {
            let ids: Vec<String> = conn
                .zrange(band.band_key(), 0, -1)
                .await
                .map_err(persistence_error("ZRANGE"))?;
            if !ids.is_empty() {
                pipe.hdel(READY_TASKS_KEY, ids).ignore();
            }
            pipe.del(band.band_key()).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(persistence_error("DEL"))
    }

    async fn load_ready(&self) -> OrchestratorResult<Vec<Task>> {
        let mut conn = self.manager.connection();
        let values: Vec<String> = conn
            .hvals(READY_TASKS_KEY)
            .await
            .map_err(persistence_error("HVALS"))?;
        Ok(Self::decode_all(values, READY_TASKS_KEY))
    }

    async fn load_pending(&self) -> OrchestratorResult<Vec<Task>> {
        let mut conn = self.manager.connection();
        let values: Vec<String> = conn
            .hvals(PENDING_TASKS_KEY)
            .await
            .map_err(persistence_error("HVALS"))?;
        Ok(Self::decode_all(values, PENDING_TASKS_KEY))
    }

    async fn band_sizes(&self) -> OrchestratorResult<BTreeMap<TaskPriority, usize>> {
        let mut conn = self.manager.connection();
        let mut sizes = BTreeMap::new();
        for band in TaskPriority::ALL {
            let size: usize = conn
                .zcard(band.band_key())
                .await
                .map_err(persistence_error("ZCARD"))?;
            sizes.insert(band, size);
        }
        Ok(sizes)
    }
}
