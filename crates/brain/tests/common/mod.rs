#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_brain::MasterBrain;
use orchestrator_coordinator::AgentCoordinator;
use orchestrator_core::{
    config::{BrainConfig, PoolConfig, SchedulerConfig, WorkerPoolConfig},
    AgentType, OrchestratorResult, ProcessExit, ProcessLauncher, ProcessSignal, WorkerProcess,
    WorkerSpawnSpec,
};
use orchestrator_dispatcher::PriorityScheduler;
use orchestrator_infrastructure::InMemoryTaskMirror;
use orchestrator_worker::WorkerPoolManager;

/// 启动后一直存活、收到信号即退出的假进程
#[derive(Default)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, _spec: &WorkerSpawnSpec) -> OrchestratorResult<Box<dyn WorkerProcess>> {
        let pid = 2000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess { pid, exit: None }))
    }
}

struct FakeProcess {
    pid: u32,
    exit: Option<ProcessExit>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn signal(&mut self, _signal: ProcessSignal) -> OrchestratorResult<()> {
        self.exit = Some(ProcessExit { code: None });
        Ok(())
    }

    fn try_wait(&mut self) -> OrchestratorResult<Option<ProcessExit>> {
        Ok(self.exit)
    }

    async fn wait(&mut self) -> OrchestratorResult<ProcessExit> {
        Ok(self.exit.unwrap_or(ProcessExit { code: None }))
    }
}

/// 最小Worker数都为0，测试开始时没有任何Worker
pub fn pools() -> Vec<PoolConfig> {
    vec![
        PoolConfig::new("backend", 0, 4),
        PoolConfig::new("qa", 0, 2),
        PoolConfig::new("critical", 0, 6),
    ]
}

pub fn brain_with(config: BrainConfig) -> Arc<MasterBrain> {
    let scheduler = Arc::new(PriorityScheduler::new(
        Arc::new(InMemoryTaskMirror::new()),
        Some(SchedulerConfig::default()),
    ));
    let pool_manager = Arc::new(WorkerPoolManager::new(
        Arc::new(FakeLauncher::default()),
        Some(WorkerPoolConfig {
            graceful_stop_timeout_seconds: 1,
            pools: pools(),
            ..Default::default()
        }),
    ));
    let coordinator = Arc::new(AgentCoordinator::new(None));
    Arc::new(MasterBrain::new(scheduler, pool_manager, coordinator, Some(config)))
}

pub fn brain() -> Arc<MasterBrain> {
    brain_with(BrainConfig::default())
}

/// 注册并通过心跳使Agent进入 READY
pub async fn ready_agent(brain: &MasterBrain, agent_type: AgentType) -> String {
    let id = brain.coordinator().register_agent(agent_type, vec![]).await;
    brain.coordinator().heartbeat(&id).await.unwrap();
    id
}
