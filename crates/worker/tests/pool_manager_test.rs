mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{pool_config, FakeLauncher};
use orchestrator_core::{config::PoolConfig, OrchestratorError, ProcessSignal, WorkerStatus};
use orchestrator_worker::WorkerPoolManager;
use tokio::sync::broadcast;

fn manager_with(launcher: Arc<FakeLauncher>, pools: Vec<PoolConfig>) -> Arc<WorkerPoolManager> {
    Arc::new(WorkerPoolManager::new(launcher, Some(pool_config(pools))))
}

#[tokio::test]
async fn test_start_worker_respects_max_workers() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 1, 2)]);

    let first = manager.start_worker("qa", Some(2)).await.unwrap().unwrap();
    assert!(first.worker_id.starts_with("qa-"));
    assert_eq!(first.status, WorkerStatus::Idle);
    assert_eq!(first.concurrency, 2);
    assert!(first.process_id.is_some());

    assert!(manager.start_worker("qa", None).await.unwrap().is_some());
    assert!(manager.start_worker("qa", None).await.unwrap().is_none());
    assert_eq!(launcher.spawned(), 2);
}

#[tokio::test]
async fn test_unknown_queue_creates_pool_lazily() {
    let manager = manager_with(FakeLauncher::new(), vec![]);
    assert!(manager.start_worker("openclaw", None).await.unwrap().is_some());

    let stats = manager.get_worker_stats(Some("openclaw")).await;
    assert_eq!(stats.total_workers, 1);
    assert_eq!(stats.pools["openclaw"].min_workers, 1);
}

#[tokio::test]
async fn test_spawn_failure_releases_reserved_slot() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 1, 1)]);

    launcher.fail_spawns(true);
    let result = manager.start_worker("qa", None).await;
    assert!(matches!(result, Err(OrchestratorError::WorkerSpawn(_))));
    assert_eq!(manager.get_worker_stats(None).await.total_workers, 0);

    launcher.fail_spawns(false);
    assert!(manager.start_worker("qa", None).await.unwrap().is_some());
}

#[tokio::test]
async fn test_graceful_stop_sends_sigterm() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 0, 2)]);
    let worker = manager.start_worker("qa", None).await.unwrap().unwrap();

    assert!(manager.stop_worker(&worker.worker_id, true).await.unwrap());
    assert_eq!(launcher.signals(&worker.worker_id), vec![ProcessSignal::Terminate]);
    assert!(manager.get_worker(&worker.worker_id).await.is_none());

    // 句柄已释放
    assert!(!manager.stop_worker(&worker.worker_id, true).await.unwrap());
}

#[tokio::test]
async fn test_graceful_stop_escalates_to_sigkill_after_timeout() {
    let launcher = FakeLauncher::new();
    launcher.ignore_terminate(true);
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 0, 2)]);
    let worker = manager.start_worker("qa", None).await.unwrap().unwrap();

    assert!(manager.stop_worker(&worker.worker_id, true).await.unwrap());
    assert_eq!(
        launcher.signals(&worker.worker_id),
        vec![ProcessSignal::Terminate, ProcessSignal::Kill]
    );
}

#[tokio::test]
async fn test_forced_stop_skips_sigterm() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 0, 2)]);
    let worker = manager.start_worker("qa", None).await.unwrap().unwrap();

    assert!(manager.stop_worker(&worker.worker_id, false).await.unwrap());
    assert_eq!(launcher.signals(&worker.worker_id), vec![ProcessSignal::Kill]);
}

#[tokio::test]
async fn test_scale_pool_clamps_out_of_range_targets() {
    let manager = manager_with(FakeLauncher::new(), vec![PoolConfig::new("backend", 2, 5)]);

    let started = manager.scale_pool("backend", 100).await.unwrap();
    assert_eq!(started.len(), 5);
    assert_eq!(manager.get_worker_stats(Some("backend")).await.active_workers, 5);

    manager.scale_pool("backend", 0).await.unwrap();
    assert_eq!(manager.get_worker_stats(Some("backend")).await.active_workers, 2);

    let missing = manager.scale_pool("nope", 1).await;
    assert!(matches!(missing, Err(OrchestratorError::PoolNotFound { .. })));
}

#[tokio::test]
async fn test_scale_down_stops_idle_workers_first() {
    let manager = manager_with(FakeLauncher::new(), vec![PoolConfig::new("qa", 1, 3)]);
    manager.scale_pool("qa", 3).await.unwrap();

    let ids = manager.worker_ids().await;
    manager.mark_worker_busy(&ids[0], "task-1").await.unwrap();

    manager.scale_pool("qa", 1).await.unwrap();
    let remaining = manager.worker_ids().await;
    assert_eq!(remaining, vec![ids[0].clone()]);
    assert_eq!(
        manager.get_worker(&ids[0]).await.unwrap().status,
        WorkerStatus::Busy
    );
}

#[tokio::test]
async fn test_auto_scale_reaches_two_and_never_exceeds_max() {
    let manager = manager_with(FakeLauncher::new(), vec![PoolConfig::new("frontend", 1, 3)]);
    let worker = manager.start_worker("frontend", None).await.unwrap().unwrap();
    manager.mark_worker_busy(&worker.worker_id, "t1").await.unwrap();

    manager.auto_scale().await;
    assert_eq!(manager.get_worker_stats(Some("frontend")).await.active_workers, 2);

    for _ in 0..5 {
        for id in manager.worker_ids().await {
            manager.mark_worker_busy(&id, "t").await.unwrap();
        }
        manager.auto_scale().await;
        let stats = manager.get_worker_stats(Some("frontend")).await;
        assert!(stats.active_workers <= 3);
    }
    assert_eq!(manager.get_worker_stats(Some("frontend")).await.active_workers, 3);
}

#[tokio::test]
async fn test_auto_scale_is_noop_in_dead_zone() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 1, 4)]);
    manager.scale_pool("qa", 2).await.unwrap();
    let ids = manager.worker_ids().await;
    manager.mark_worker_busy(&ids[0], "t").await.unwrap();

    let spawned = launcher.spawned();
    manager.auto_scale().await;
    assert_eq!(launcher.spawned(), spawned);
    assert_eq!(manager.get_worker_stats(Some("qa")).await.active_workers, 2);
}

#[tokio::test]
async fn test_auto_scale_down_when_idle() {
    let manager = manager_with(FakeLauncher::new(), vec![PoolConfig::new("qa", 1, 4)]);
    manager.scale_pool("qa", 3).await.unwrap();

    manager.auto_scale().await;
    assert_eq!(manager.get_worker_stats(Some("qa")).await.active_workers, 2);
}

#[tokio::test]
async fn test_refresh_marks_exited_workers() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 0, 3)]);
    let clean = manager.start_worker("qa", None).await.unwrap().unwrap();
    let crashed = manager.start_worker("qa", None).await.unwrap().unwrap();

    launcher.crash(&clean.worker_id, 0);
    launcher.crash(&crashed.worker_id, 137);

    let mut exited = manager.refresh_worker_status().await;
    exited.sort();
    let mut expected = vec![clean.worker_id.clone(), crashed.worker_id.clone()];
    expected.sort();
    assert_eq!(exited, expected);

    let clean = manager.get_worker(&clean.worker_id).await.unwrap();
    assert_eq!(clean.status, WorkerStatus::Stopped);
    assert!(clean.process_id.is_none());
    let crashed = manager.get_worker(&crashed.worker_id).await.unwrap();
    assert_eq!(crashed.status, WorkerStatus::Error);
}

#[tokio::test]
async fn test_restart_keeps_id_queue_and_concurrency() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 0, 1)]);
    let worker = manager.start_worker("qa", Some(4)).await.unwrap().unwrap();

    let restarted = manager.restart_worker(&worker.worker_id).await.unwrap().unwrap();
    assert_eq!(restarted.worker_id, worker.worker_id);
    assert_eq!(restarted.queue, "qa");
    assert_eq!(restarted.concurrency, 4);
    assert_ne!(restarted.process_id, worker.process_id);
    assert_eq!(launcher.spawned(), 2);

    let missing = manager.restart_worker("ghost").await;
    assert!(matches!(missing, Err(OrchestratorError::WorkerNotFound { .. })));
}

#[tokio::test]
async fn test_busy_idle_bookkeeping() {
    let manager = manager_with(FakeLauncher::new(), vec![PoolConfig::new("qa", 0, 1)]);
    let worker = manager.start_worker("qa", None).await.unwrap().unwrap();

    manager.mark_worker_busy(&worker.worker_id, "task-9").await.unwrap();
    let busy = manager.get_worker(&worker.worker_id).await.unwrap();
    assert_eq!(busy.current_task.as_deref(), Some("task-9"));

    manager.mark_worker_idle(&worker.worker_id, false).await.unwrap();
    let idle = manager.get_worker(&worker.worker_id).await.unwrap();
    assert_eq!(idle.status, WorkerStatus::Idle);
    assert_eq!(idle.tasks_processed, 1);
    assert_eq!(idle.tasks_failed, 1);

    assert!(manager.mark_worker_busy("ghost", "t").await.is_err());
}

#[tokio::test]
async fn test_set_pool_config_validates() {
    let manager = manager_with(FakeLauncher::new(), vec![]);
    let config = manager
        .set_pool_config("ml", Some(2), Some(6), Some(0.9), None)
        .await
        .unwrap();
    assert_eq!(config.min_workers, 2);
    assert_eq!(config.max_workers, 6);
    assert_eq!(config.scale_down_threshold, 0.2);

    let invalid = manager.set_pool_config("ml", Some(10), None, None, None).await;
    assert!(matches!(invalid, Err(OrchestratorError::Configuration(_))));
    assert_eq!(manager.pool_config("ml").await.unwrap().min_workers, 2);
}

#[tokio::test]
async fn test_stop_all_workers() {
    let manager = manager_with(
        FakeLauncher::new(),
        vec![PoolConfig::new("qa", 1, 2), PoolConfig::new("backend", 1, 2)],
    );
    manager.scale_pool("qa", 2).await.unwrap();
    manager.scale_pool("backend", 1).await.unwrap();

    assert_eq!(manager.stop_all_workers(true).await, 3);
    assert_eq!(manager.get_worker_stats(None).await.total_workers, 0);
}

#[tokio::test]
async fn test_monitoring_loop_stops_on_shutdown() {
    let manager = manager_with(FakeLauncher::new(), vec![PoolConfig::new("qa", 1, 2)]);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = manager.start_monitoring(Duration::from_millis(10), shutdown_rx);

    // 首次tick会把空池扩到最小值
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_worker_stats(Some("qa")).await.active_workers, 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_suspended_pool_skips_auto_scale() {
    let launcher = FakeLauncher::new();
    let manager = manager_with(launcher.clone(), vec![PoolConfig::new("qa", 1, 2)]);
    assert!(manager.suspend_pool("qa").await);
    assert!(!manager.suspend_pool("ghost").await);

    manager.auto_scale().await;
    assert_eq!(launcher.spawned(), 0);

    manager.resume_pool("qa").await;
    manager.auto_scale().await;
    assert_eq!(launcher.spawned(), 1);
    assert!(!manager.is_suspended("qa").await);
}
