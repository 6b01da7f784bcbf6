use thiserror::Error;

/// 编排核心错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务已存在: {id}")]
    DuplicateTask { id: String },

    #[error("检测到循环依赖: 任务 {task_id}")]
    CircularDependency { task_id: String },

    #[error("无效的优先级: {0}")]
    InvalidPriority(u8),

    #[error("Agent未找到: {id}")]
    AgentNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("Worker池未找到: {queue}")]
    PoolNotFound { queue: String },

    #[error("工作流未找到: {id}")]
    WorkflowNotFound { id: String },

    #[error("决策未找到: {id}")]
    DecisionNotFound { id: String },

    #[error("启动Worker进程失败: {0}")]
    WorkerSpawn(String),

    #[error("发送进程信号失败: {0}")]
    ProcessSignal(String),

    #[error("持久化存储错误: {0}")]
    Persistence(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的命令: {0}")]
    InvalidCommand(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl OrchestratorError {
    /// 是否为"资源不存在"类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TaskNotFound { .. }
                | OrchestratorError::AgentNotFound { .. }
                | OrchestratorError::WorkerNotFound { .. }
                | OrchestratorError::PoolNotFound { .. }
                | OrchestratorError::WorkflowNotFound { .. }
                | OrchestratorError::DecisionNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_localized() {
        let err = OrchestratorError::TaskNotFound {
            id: "t-1".to_string(),
        };
        assert_eq!(err.to_string(), "任务未找到: t-1");

        let err = OrchestratorError::CircularDependency {
            task_id: "a".to_string(),
        };
        assert!(err.to_string().contains("循环依赖"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(OrchestratorError::PoolNotFound {
            queue: "qa".to_string()
        }
        .is_not_found());
        assert!(!OrchestratorError::Internal("x".to_string()).is_not_found());
    }

    #[test]
    fn test_from_serde_error() {
        let err: OrchestratorError = serde_json::from_str::<serde_json::Value>("{bad")
            .unwrap_err()
            .into();
        assert!(matches!(err, OrchestratorError::Serialization(_)));
    }
}
