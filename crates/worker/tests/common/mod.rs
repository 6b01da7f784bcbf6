#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::{
    config::{PoolConfig, WorkerPoolConfig},
    OrchestratorError, OrchestratorResult, ProcessExit, ProcessLauncher, ProcessSignal,
    WorkerProcess, WorkerSpawnSpec,
};

#[derive(Debug, Default)]
struct ProcessState {
    exit: Option<ProcessExit>,
    signals: Vec<ProcessSignal>,
}

/// 内存中的假进程启动器，可以模拟崩溃与忽略SIGTERM
#[derive(Default)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
    fail_spawn: AtomicBool,
    ignore_terminate: AtomicBool,
    processes: Arc<Mutex<HashMap<String, Arc<Mutex<ProcessState>>>>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        })
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn ignore_terminate(&self, ignore: bool) {
        self.ignore_terminate.store(ignore, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> u32 {
        self.next_pid.load(Ordering::SeqCst) - 1000
    }

    /// 让Worker进程以给定退出码退出
    pub fn crash(&self, worker_id: &str, code: i32) {
        if let Some(state) = self.processes.lock().unwrap().get(worker_id) {
            state.lock().unwrap().exit = Some(ProcessExit { code: Some(code) });
        }
    }

    pub fn signals(&self, worker_id: &str) -> Vec<ProcessSignal> {
        self.processes
            .lock()
            .unwrap()
            .get(worker_id)
            .map(|s| s.lock().unwrap().signals.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, spec: &WorkerSpawnSpec) -> OrchestratorResult<Box<dyn WorkerProcess>> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(OrchestratorError::WorkerSpawn("模拟启动失败".to_string()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(Mutex::new(ProcessState::default()));
        self.processes
            .lock()
            .unwrap()
            .insert(spec.worker_id.clone(), Arc::clone(&state));
        Ok(Box::new(FakeProcess {
            pid,
            state,
            ignore_terminate: self.ignore_terminate.load(Ordering::SeqCst),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    state: Arc<Mutex<ProcessState>>,
    ignore_terminate: bool,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn signal(&mut self, signal: ProcessSignal) -> OrchestratorResult<()> {
        let mut state = self.state.lock().unwrap();
        state.signals.push(signal);
        let exits = match signal {
            ProcessSignal::Terminate => !self.ignore_terminate,
            ProcessSignal::Kill => true,
        };
        if exits && state.exit.is_none() {
            state.exit = Some(ProcessExit { code: None });
        }
        Ok(())
    }

    fn try_wait(&mut self) -> OrchestratorResult<Option<ProcessExit>> {
        Ok(self.state.lock().unwrap().exit)
    }

    async fn wait(&mut self) -> OrchestratorResult<ProcessExit> {
        loop {
            let exit = self.state.lock().unwrap().exit;
            if let Some(exit) = exit {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// 只包含给定池的配置，优雅停止超时为1秒
pub fn pool_config(pools: Vec<PoolConfig>) -> WorkerPoolConfig {
    WorkerPoolConfig {
        graceful_stop_timeout_seconds: 1,
        pools,
        ..Default::default()
    }
}
