//! The launcher capability set shared by every engine-process variant.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{HarnessConfig, LauncherKind, LauncherPlatform, LyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherState {
    Uninitialized,
    Prepared,
    Running,
    Stopped,
}

/// Per-launch configuration. Built from [`HarnessConfig`] by the harness, or by hand.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub platform: LauncherPlatform,
    /// Extra command-line arguments appended after the variant's own.
    pub args: Vec<String>,
    /// Initial level, passed as `+map <level>` to game and server launchers.
    pub level: Option<String>,
    pub null_renderer: bool,
    /// Console commands written to the project's `autoexec.cfg` during setup.
    pub autoexec: Vec<String>,
    /// Explicit device id; otherwise read from the project's device config.
    pub device_id: Option<String>,
    pub package_id: Option<String>,
    /// Android activity to start; defaults to the NDK native activity.
    pub activity: Option<String>,
    pub reverse_ports: Vec<u16>,
    pub kill_timeout: Duration,
    /// Executable for generic launchers.
    pub binary: Option<PathBuf>,
    /// Log the process writes. Generic and editor launchers honor it.
    pub log_file: Option<PathBuf>,
    /// Where captured stdout/stderr and settings backups go (the test's artifact folder).
    pub output_dir: PathBuf,
}

impl LauncherConfig {
    pub fn new(platform: LauncherPlatform, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            args: Vec::new(),
            level: None,
            null_renderer: true,
            autoexec: Vec::new(),
            device_id: None,
            package_id: None,
            activity: None,
            reverse_ports: Vec::new(),
            kill_timeout: Duration::from_secs(10),
            binary: None,
            log_file: None,
            output_dir: output_dir.into(),
        }
    }

    pub fn from_harness(cfg: &HarnessConfig, output_dir: &Path) -> Self {
        Self {
            platform: cfg.launcher_platform,
            args: cfg.extra_args.clone(),
            level: cfg.level.clone(),
            null_renderer: cfg.null_renderer,
            autoexec: cfg.autoexec.clone(),
            device_id: None,
            package_id: cfg.package_id().ok(),
            activity: None,
            reverse_ports: cfg.reverse_ports.clone(),
            kill_timeout: cfg.kill_timeout.0,
            binary: None,
            log_file: None,
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }
}

/// Lifecycle of one external engine process, on the host or on a device.
///
/// `setup` → `launch` → (`is_alive`)* → `kill` → `teardown`. `teardown` may be called from
/// any state, more than once, and after a failed `setup`; it restores every file the
/// launcher backed up.
pub trait Launcher {
    fn kind(&self) -> LauncherKind;

    fn state(&self) -> LauncherState;

    /// Check prerequisites, back up files the launch will mutate, apply per-test settings.
    fn setup(&mut self) -> LyResult<()>;

    /// Start the process and return without waiting for it to become idle.
    fn launch(&mut self) -> LyResult<()>;

    fn is_alive(&mut self) -> bool;

    /// Orderly shutdown, escalating to a forced kill. Killing a dead process is not an error.
    fn kill(&mut self) -> LyResult<()>;

    /// Kill, then restore backed-up settings and stop helper services.
    fn teardown(&mut self) -> LyResult<()>;

    fn binary_path(&self) -> LyResult<PathBuf>;

    /// Host path of the log this launcher's process writes.
    fn log_path(&self) -> PathBuf;

    /// Back up every file this launcher may change.
    fn save_settings(&mut self) -> LyResult<()>;

    fn restore_settings(&mut self) -> LyResult<()>;

    /// Block until the process exits; returns its exit code when the platform reports one.
    fn wait(&mut self, timeout: Duration) -> LyResult<Option<i32>>;

    fn returncode(&self) -> Option<i32> {
        None
    }

    /// Host process id, when the launcher runs one on this machine.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Bring [`Launcher::log_path`] up to date. Only needed by launchers whose process
    /// writes its log somewhere else, such as on a device.
    fn refresh_log(&mut self) -> LyResult<()> {
        Ok(())
    }

    /// Captured stdout/stderr, when the variant captures it.
    fn output(&self) -> Option<String> {
        None
    }

    fn start(&mut self) -> LyResult<()> {
        self.setup()?;
        self.launch()
    }

    fn stop(&mut self) -> LyResult<()> {
        self.teardown()
    }
}
