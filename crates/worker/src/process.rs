//! 基于操作系统进程的Worker执行体

use std::process::Stdio;

use async_trait::async_trait;
use orchestrator_core::{
    config::LauncherConfig, OrchestratorError, OrchestratorResult, ProcessExit, ProcessLauncher,
    ProcessSignal, WorkerProcess, WorkerSpawnSpec,
};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// 按配置的命令模板启动Worker进程
pub struct OsProcessLauncher {
    config: LauncherConfig,
}

impl OsProcessLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// 替换参数模板中的占位符
    pub fn render_args(&self, spec: &WorkerSpawnSpec) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{queue}", &spec.queue)
                    .replace("{worker_id}", &spec.worker_id)
                    .replace("{concurrency}", &spec.concurrency.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn spawn(&self, spec: &WorkerSpawnSpec) -> OrchestratorResult<Box<dyn WorkerProcess>> {
        let args = self.render_args(spec);
        debug!("启动Worker进程: {} {}", self.config.program, args.join(" "));

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            OrchestratorError::WorkerSpawn(format!(
                "worker_id={}, program={}, error={}",
                spec.worker_id, self.config.program, e
            ))
        })?;

        info!(
            "Worker进程已启动: worker_id={}, queue={}, pid={:?}",
            spec.worker_id,
            spec.queue,
            child.id()
        );
        Ok(Box::new(OsWorkerProcess { child }))
    }
}

/// 一个正在运行的子进程
pub struct OsWorkerProcess {
    child: Child,
}

impl OsWorkerProcess {
    #[cfg(unix)]
    fn terminate(&mut self) -> OrchestratorResult<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // 已回收的进程没有pid
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(OrchestratorError::ProcessSignal(format!(
                "SIGTERM pid={pid}: {e}"
            ))),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> OrchestratorResult<()> {
        self.kill()
    }

    fn kill(&mut self) -> OrchestratorResult<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(OrchestratorError::ProcessSignal(format!("SIGKILL: {e}"))),
        }
    }
}

#[async_trait]
impl WorkerProcess for OsWorkerProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn signal(&mut self, signal: ProcessSignal) -> OrchestratorResult<()> {
        match signal {
            ProcessSignal::Terminate => self.terminate(),
            ProcessSignal::Kill => self.kill(),
        }
    }

    fn try_wait(&mut self) -> OrchestratorResult<Option<ProcessExit>> {
        self.child
            .try_wait()
            .map(|status| status.map(|s| ProcessExit { code: s.code() }))
            .map_err(|e| OrchestratorError::Internal(format!("查询进程状态失败: {e}")))
    }

    async fn wait(&mut self) -> OrchestratorResult<ProcessExit> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| OrchestratorError::Internal(format!("等待进程退出失败: {e}")))?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }
}
