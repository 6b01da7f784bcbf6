use serde::{Deserialize, Serialize};

/// Worker池管理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub launcher: LauncherConfig,
    pub default_concurrency: u32,
    pub graceful_stop_timeout_seconds: u64,
    pub monitor_interval_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub max_restarts: u32,
    pub restart_window_seconds: u64,
    pub pools: Vec<PoolConfig>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            launcher: LauncherConfig::default(),
            default_concurrency: 1,
            graceful_stop_timeout_seconds: 30, // SIGTERM后最多等待30秒
            monitor_interval_seconds: 30,
            health_check_interval_seconds: 30,
            max_restarts: 3,
            restart_window_seconds: 300, // 5分钟滚动窗口
            pools: PoolConfig::default_pools(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.launcher.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Worker启动程序不能为空"));
        }
        if self.default_concurrency == 0 {
            return Err(anyhow::anyhow!("Worker并发数必须大于0"));
        }
        if self.monitor_interval_seconds == 0 || self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("监控间隔必须大于0"));
        }
        if self.restart_window_seconds == 0 {
            return Err(anyhow::anyhow!("重启窗口必须大于0"));
        }
        for pool in &self.pools {
            pool.validate()?;
        }
        Ok(())
    }
}

/// Worker进程启动命令
///
/// `args` 中的 `{queue}`、`{worker_id}`、`{concurrency}` 会在启动时替换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "celery".to_string(),
            args: [
                "-A",
                "task_queue.celery_app:celery_app",
                "worker",
                "-Q",
                "{queue}",
                "-n",
                "{worker_id}@%h",
                "-c",
                "{concurrency}",
                "--loglevel",
                "INFO",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// 单个命名队列的Worker池配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub queue: String,
    pub min_workers: usize,
    pub max_workers: usize,
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
}

fn default_scale_up_threshold() -> f64 {
    0.8
}

fn default_scale_down_threshold() -> f64 {
    0.2
}

impl PoolConfig {
    pub fn new(queue: impl Into<String>, min_workers: usize, max_workers: usize) -> Self {
        Self {
            queue: queue.into(),
            min_workers,
            max_workers,
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
        }
    }

    /// 默认的各队列Worker池
    pub fn default_pools() -> Vec<PoolConfig> {
        [
            ("frontend", 1, 3),
            ("backend", 2, 5),
            ("database", 1, 3),
            ("devops", 1, 2),
            ("qa", 1, 4),
            ("uiux", 1, 2),
            ("security", 1, 2),
            ("aiml", 1, 3),
            ("project_manager", 1, 2),
            ("master_brain", 1, 1),
            ("openclaw", 1, 3),
            ("critical", 2, 6),
            ("high", 2, 4),
            ("medium", 2, 4),
            ("low", 1, 2),
        ]
        .into_iter()
        .map(|(queue, min, max)| PoolConfig::new(queue, min, max))
        .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.trim().is_empty() {
            return Err(anyhow::anyhow!("队列名称不能为空"));
        }
        if self.max_workers == 0 || self.min_workers > self.max_workers {
            return Err(anyhow::anyhow!(
                "队列 {} 的Worker数量范围无效: [{}, {}]",
                self.queue,
                self.min_workers,
                self.max_workers
            ));
        }
        if !(0.0..=1.0).contains(&self.scale_down_threshold)
            || !(0.0..=1.0).contains(&self.scale_up_threshold)
            || self.scale_down_threshold >= self.scale_up_threshold
        {
            return Err(anyhow::anyhow!(
                "队列 {} 的扩缩容阈值无效: down={} up={}",
                self.queue,
                self.scale_down_threshold,
                self.scale_up_threshold
            ));
        }
        Ok(())
    }
}
