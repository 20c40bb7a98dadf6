//! Launcher that observes a process someone else started.

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    Deadline, Launcher, LauncherKind, LauncherState, LyError, LyResult, ProcessKiller, ProcessTable,
    SystemProcessTable,
};

/// Wraps an existing pid (or nothing, for pure log watching) so it can be handed to a
/// [`crate::LogMonitor`]. Without a pid the process counts as alive until the monitor's deadline.
pub struct AttachedLauncher<T: ProcessTable = SystemProcessTable> {
    pid: Option<u32>,
    log_path: PathBuf,
    killer: ProcessKiller<T>,
    state: LauncherState,
}

impl AttachedLauncher<SystemProcessTable> {
    pub fn new(pid: Option<u32>, log_path: impl Into<PathBuf>, kill_timeout: Duration) -> Self {
        Self::with_table(pid, log_path, ProcessKiller::system(kill_timeout))
    }
}

impl<T: ProcessTable> AttachedLauncher<T> {
    pub fn with_table(pid: Option<u32>, log_path: impl Into<PathBuf>, killer: ProcessKiller<T>) -> Self {
        Self {
            pid,
            log_path: log_path.into(),
            killer,
            state: LauncherState::Running,
        }
    }
}

impl<T: ProcessTable> Launcher for AttachedLauncher<T> {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Generic
    }

    fn state(&self) -> LauncherState {
        self.state
    }

    fn setup(&mut self) -> LyResult<()> {
        Ok(())
    }

    fn launch(&mut self) -> LyResult<()> {
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        if self.state == LauncherState::Stopped {
            return false;
        }
        match self.pid {
            Some(pid) => self.killer.table_mut().is_running(pid),
            None => true,
        }
    }

    fn kill(&mut self) -> LyResult<()> {
        if let Some(pid) = self.pid {
            self.killer.kill_process_with_pid(pid, false)?;
        }
        self.state = LauncherState::Stopped;
        Ok(())
    }

    fn teardown(&mut self) -> LyResult<()> {
        self.state = LauncherState::Stopped;
        Ok(())
    }

    fn binary_path(&self) -> LyResult<PathBuf> {
        Err(LyError::NotImplemented("attached processes have no known binary".to_string()))
    }

    fn log_path(&self) -> PathBuf {
        self.log_path.clone()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn save_settings(&mut self) -> LyResult<()> {
        Ok(())
    }

    fn restore_settings(&mut self) -> LyResult<()> {
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> LyResult<Option<i32>> {
        let deadline = Deadline::after(timeout);
        if deadline.poll_until(Duration::from_millis(100), || !self.is_alive()) {
            return Ok(None);
        }
        Err(LyError::WaitTimeout {
            what: format!("attached process {:?} to exit", self.pid),
            seconds: timeout.as_secs_f64(),
        })
    }
}
