use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_api::create_app;
use orchestrator_brain::{ControlPlane, MasterBrain};
use orchestrator_coordinator::AgentCoordinator;
use orchestrator_core::config::AppConfig;
use orchestrator_dispatcher::PriorityScheduler;
use orchestrator_infrastructure::{create_task_mirror, install_prometheus_exporter};
use orchestrator_worker::{OsProcessLauncher, WorkerHealthChecker, WorkerPoolManager};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// 主应用程序，持有所有组件
pub struct Application {
    config: AppConfig,
    control_plane: Arc<ControlPlane>,
    health_checker: Arc<WorkerHealthChecker>,
}

impl Application {
    /// 创建并装配所有组件，镜像中的任务在此时恢复到调度器
    pub async fn new(config: AppConfig) -> Result<Self> {
        if config.observability.metrics_enabled {
            install_prometheus_exporter(&config.observability.metrics_bind_address)?;
        }

        let mirror = create_task_mirror(&config.persistence)
            .await
            .context("创建任务镜像失败")?;
        let scheduler = Arc::new(PriorityScheduler::new(
            mirror,
            Some(config.scheduler.clone()),
        ));
        let report = scheduler.recover().await.context("恢复任务失败")?;
        info!(
            "任务恢复完成: {} 就绪, {} 等待依赖, {} 跳过",
            report.ready, report.pending, report.skipped
        );
        if !report.dead_lettered.is_empty() {
            warn!("{} 个任务因循环依赖移入死信", report.dead_lettered.len());
        }

        let launcher = Arc::new(OsProcessLauncher::new(config.worker_pool.launcher.clone()));
        let pool_manager = Arc::new(WorkerPoolManager::new(
            launcher,
            Some(config.worker_pool.clone()),
        ));
        let health_checker = Arc::new(WorkerHealthChecker::new(
            Arc::clone(&pool_manager),
            Some(config.worker_pool.clone()),
        ));
        let coordinator = Arc::new(AgentCoordinator::new(Some(config.coordinator.clone())));

        let brain = Arc::new(MasterBrain::new(
            scheduler,
            pool_manager,
            coordinator,
            Some(config.brain.clone()),
        ));
        let control_plane = Arc::new(ControlPlane::new(brain, Some(config.api.clone())));

        Ok(Self {
            config,
            control_plane,
            health_checker,
        })
    }

    pub fn control_plane(&self) -> &Arc<ControlPlane> {
        &self.control_plane
    }

    pub fn brain(&self) -> &Arc<MasterBrain> {
        self.control_plane.brain()
    }

    /// 启动最小Worker数、后台循环与HTTP服务，直到收到关闭信号
    pub async fn run(&self, shutdown: &ShutdownManager) -> Result<()> {
        let api_handle = if self.config.api.enabled {
            Some(self.start_api_server(shutdown).await?)
        } else {
            None
        };

        self.start_minimum_workers().await;

        let mut handles = self.start_background_loops(shutdown).await;
        handles.extend(api_handle);

        let mut shutdown_rx = shutdown.subscribe().await;
        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        self.brain().shutdown().await;
        let stopped = self.brain().pool_manager().stop_all_workers(true).await;
        info!("已停止 {} 个Worker", stopped);
        Ok(())
    }

    async fn start_minimum_workers(&self) {
        let pool_manager = self.brain().pool_manager();
        for pool in &self.config.worker_pool.pools {
            if pool.min_workers == 0 {
                continue;
            }
            match pool_manager.scale_pool(&pool.queue, pool.min_workers).await {
                Ok(_) => info!("Worker池 {} 已启动 {} 个Worker", pool.queue, pool.min_workers),
                Err(e) => error!("启动Worker池 {} 失败: {}", pool.queue, e),
            }
        }
    }

    async fn start_background_loops(&self, shutdown: &ShutdownManager) -> Vec<JoinHandle<()>> {
        let brain = self.brain();
        let mut handles = Vec::new();

        handles.push(brain.pool_manager().start_monitoring(
            seconds(self.config.worker_pool.monitor_interval_seconds),
            shutdown.subscribe().await,
        ));
        handles.push(self.health_checker.start(
            seconds(self.config.worker_pool.health_check_interval_seconds),
            shutdown.subscribe().await,
        ));
        handles.push(brain.coordinator().start_health_monitoring(
            seconds(self.config.coordinator.health_check_interval_seconds),
            shutdown.subscribe().await,
        ));
        handles.extend(brain.start(shutdown.sender()).await);

        info!("已启动 {} 个后台循环", handles.len());
        handles
    }

    async fn start_api_server(&self, shutdown: &ShutdownManager) -> Result<JoinHandle<()>> {
        let bind_address = &self.config.api.bind_address;
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {bind_address}"))?;
        info!("API服务器启动在 http://{}", bind_address);

        let app = create_app(Arc::clone(&self.control_plane));
        let mut shutdown_rx = shutdown.subscribe().await;
        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("API服务器运行失败: {}", e);
            }
            info!("API服务器已停止");
        }))
    }
}

fn seconds(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}
