//! Redis任务镜像
//!
//! 键布局：
//!
//! ```text
//! queue:<band>   ZSET  member=任务id  score=创建时间(毫秒)
//! ready_tasks    HASH  任务id -> 任务JSON
//! pending_tasks  HASH  任务id -> 任务JSON (等待依赖)
//! ```

pub mod connection_manager;
pub mod task_mirror;

pub use connection_manager::RedisConnectionManager;
pub use task_mirror::RedisTaskMirror;
