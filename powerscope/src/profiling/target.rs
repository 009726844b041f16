//! Target process handles
//!
//! The orchestrator only needs two things from its target: the PID to sample
//! and a liveness check it can call once per tick.
//!
//! - [`AttachedProcess`]: an existing process; alive while `/proc/<pid>` exists
//! - [`SpawnedProcess`]: a child we launched; alive until it can be reaped

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use std::process::{Child, Command};

use crate::domain::Pid;

/// Process being profiled
pub trait TargetProcess {
    fn pid(&self) -> Pid;

    /// Cheap check run before every tick
    fn is_alive(&mut self) -> bool;

    /// Called once when sampling stops
    fn release(&mut self) {}
}

/// A process that was already running when we attached
#[derive(Debug, Clone, Copy)]
pub struct AttachedProcess(pub Pid);

impl TargetProcess for AttachedProcess {
    fn pid(&self) -> Pid {
        self.0
    }

    fn is_alive(&mut self) -> bool {
        Path::new(&self.0.proc_dir()).exists()
    }
}

/// A command launched by the profiler
pub struct SpawnedProcess {
    pid: Pid,
    child: Child,
}

impl SpawnedProcess {
    /// Launch `command` and return immediately
    ///
    /// Python scripts (`*.py`) are run through `python3`. The caller decides
    /// how long to let the child map its libraries before attaching.
    ///
    /// # Errors
    /// Returns an error if the command is empty or cannot be started
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().context("No command given to spawn")?;
        let mut cmd = if Path::new(program).extension().is_some_and(|ext| ext == "py") {
            let mut python = Command::new("python3");
            python.arg(program);
            python
        } else {
            Command::new(program)
        };
        cmd.args(args);

        let child = cmd.spawn().with_context(|| format!("Failed to spawn {program}"))?;
        let pid = Pid(i32::try_from(child.id()).context("Child PID out of range")?);
        info!("Spawned {program} as {pid}");
        Ok(Self { pid, child })
    }
}

impl TargetProcess for SpawnedProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn release(&mut self) {
        if !self.is_alive() {
            return;
        }
        info!("Stopping spawned {}", self.pid);
        if let Err(e) = self.child.kill().and_then(|()| self.child.wait().map(drop)) {
            warn!("Failed to stop {}: {e}", self.pid);
        }
    }
}

impl Drop for SpawnedProcess {
    fn drop(&mut self) {
        self.release();
    }
}
