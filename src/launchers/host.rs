//! Launchers for engine processes that run on the host: editor, game, dedicated server and
//! arbitrary binaries.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    Deadline, Launcher, LauncherConfig, LauncherKind, LauncherState, LyError, LyResult, ResourceLocator,
    SettingsBackup, collision_handled_filename, DEFAULT_COLLISION_ATTEMPTS,
};

const POLL: Duration = Duration::from_millis(100);

/// A spawned child with stdout and stderr captured to one file.
#[derive(Debug)]
pub struct HostProcess {
    child: Child,
    program: String,
    returncode: Option<i32>,
    output_path: PathBuf,
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    -1
}

impl HostProcess {
    pub fn spawn(binary: &Path, args: &[String], cwd: &Path, output_path: &Path) -> LyResult<Self> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = File::create(output_path)?;
        let err = out.try_clone()?;
        let program = binary.display().to_string();
        tracing::info!("starting {program} {}", args.join(" "));
        let child = Command::new(binary)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()
            .map_err(|e| LyError::Setup(format!("failed to start {program}: {e}")))?;
        Ok(Self {
            child,
            program,
            returncode: None,
            output_path: output_path.to_path_buf(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn is_alive(&mut self) -> bool {
        if self.returncode.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.returncode = Some(exit_code(status));
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!("could not poll {}: {e}", self.program);
                false
            }
        }
    }

    pub fn wait(&mut self, timeout: Duration) -> LyResult<Option<i32>> {
        let deadline = Deadline::after(timeout);
        if deadline.poll_until(POLL.min(timeout.max(Duration::from_millis(1))), || !self.is_alive()) {
            return Ok(self.returncode);
        }
        Err(LyError::WaitTimeout {
            what: format!("{} (pid {}) to exit", self.program, self.pid()),
            seconds: timeout.as_secs_f64(),
        })
    }

    /// Ask the process to exit, then force-kill it once `grace` has passed.
    pub fn terminate(&mut self, grace: Duration) -> LyResult<()> {
        if !self.is_alive() {
            return Ok(());
        }
        tracing::info!("stopping {} (pid {})", self.program, self.pid());
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Ok(raw) = i32::try_from(self.child.id()) {
                let _ = signal::kill(Pid::from_raw(raw), Signal::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        if self.wait(grace).is_ok() {
            return Ok(());
        }
        tracing::warn!("{} ignored the stop request, killing it", self.program);
        match self.child.kill() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        let status = self.child.wait()?;
        self.returncode = Some(exit_code(status));
        Ok(())
    }

    pub fn read_output(&self) -> Option<String> {
        std::fs::read(&self.output_path)
            .ok()
            .map(|b| String::from_utf8_lossy(&b).to_string())
    }
}

/// The per-variant parts of a host launcher.
pub trait HostVariant {
    const KIND: LauncherKind;

    fn binary(locator: &ResourceLocator, config: &LauncherConfig) -> LyResult<PathBuf>;

    /// Arguments placed before the configured extra arguments.
    fn args(locator: &ResourceLocator, config: &LauncherConfig) -> Vec<String>;

    fn log_path(locator: &ResourceLocator, config: &LauncherConfig) -> PathBuf;

    /// Files the launch may mutate; backed up in `setup` and restored in `teardown`.
    fn settings_files(_locator: &ResourceLocator) -> Vec<PathBuf> {
        Vec::new()
    }

    fn writes_autoexec() -> bool {
        false
    }
}

fn engine_args(locator: &ResourceLocator, config: &LauncherConfig) -> Vec<String> {
    let mut args = vec![format!("--project-path={}", locator.project_directory().display())];
    if config.null_renderer {
        args.push("-rhi=Null".to_string());
    }
    args
}

fn map_args(config: &LauncherConfig) -> Vec<String> {
    match &config.level {
        Some(level) => vec!["+map".to_string(), level.clone()],
        None => Vec::new(),
    }
}

#[derive(Debug)]
pub struct EditorVariant;

impl HostVariant for EditorVariant {
    const KIND: LauncherKind = LauncherKind::Editor;

    fn binary(locator: &ResourceLocator, _config: &LauncherConfig) -> LyResult<PathBuf> {
        Ok(locator.editor())
    }

    fn args(locator: &ResourceLocator, config: &LauncherConfig) -> Vec<String> {
        let mut args = engine_args(locator, config);
        args.push("-autotest_mode".to_string());
        args.push("--regset=/Amazon/Settings/EnableSourceControl=false".to_string());
        args
    }

    fn log_path(locator: &ResourceLocator, config: &LauncherConfig) -> PathBuf {
        config.log_file.clone().unwrap_or_else(|| locator.editor_log())
    }

    fn settings_files(locator: &ResourceLocator) -> Vec<PathBuf> {
        vec![
            locator
                .project_directory()
                .join("user")
                .join("Registry")
                .join("editorpreferences.setreg"),
        ]
    }
}

#[derive(Debug)]
pub struct GameVariant;

impl HostVariant for GameVariant {
    const KIND: LauncherKind = LauncherKind::Game;

    fn binary(locator: &ResourceLocator, _config: &LauncherConfig) -> LyResult<PathBuf> {
        Ok(locator.game_launcher())
    }

    fn args(locator: &ResourceLocator, config: &LauncherConfig) -> Vec<String> {
        let mut args = engine_args(locator, config);
        args.extend(map_args(config));
        args
    }

    fn log_path(locator: &ResourceLocator, _config: &LauncherConfig) -> PathBuf {
        locator.game_log()
    }

    fn settings_files(locator: &ResourceLocator) -> Vec<PathBuf> {
        vec![locator.autoexec_file()]
    }

    fn writes_autoexec() -> bool {
        true
    }
}

#[derive(Debug)]
pub struct ServerVariant;

impl HostVariant for ServerVariant {
    const KIND: LauncherKind = LauncherKind::DedicatedServer;

    fn binary(locator: &ResourceLocator, _config: &LauncherConfig) -> LyResult<PathBuf> {
        Ok(locator.dedicated_server_launcher())
    }

    fn args(locator: &ResourceLocator, config: &LauncherConfig) -> Vec<String> {
        let mut args = engine_args(locator, config);
        args.extend(map_args(config));
        args
    }

    fn log_path(locator: &ResourceLocator, _config: &LauncherConfig) -> PathBuf {
        locator.server_log()
    }

    fn settings_files(locator: &ResourceLocator) -> Vec<PathBuf> {
        vec![locator.autoexec_file()]
    }

    fn writes_autoexec() -> bool {
        true
    }
}

/// Any binary; relative paths resolve against the build directory.
#[derive(Debug)]
pub struct GenericVariant;

impl HostVariant for GenericVariant {
    const KIND: LauncherKind = LauncherKind::Generic;

    fn binary(locator: &ResourceLocator, config: &LauncherConfig) -> LyResult<PathBuf> {
        let binary = config
            .binary
            .as_ref()
            .ok_or_else(|| LyError::Setup("generic launcher needs a binary".to_string()))?;
        if binary.is_absolute() {
            Ok(binary.clone())
        } else {
            Ok(locator.build_directory().join(binary))
        }
    }

    fn args(_locator: &ResourceLocator, _config: &LauncherConfig) -> Vec<String> {
        Vec::new()
    }

    fn log_path(locator: &ResourceLocator, config: &LauncherConfig) -> PathBuf {
        config
            .log_file
            .clone()
            .unwrap_or_else(|| locator.project_log().join("Game.log"))
    }
}

/// Launcher for a process on the host, parameterised by its variant.
pub struct HostLauncher<V: HostVariant> {
    locator: Arc<ResourceLocator>,
    config: LauncherConfig,
    state: LauncherState,
    process: Option<HostProcess>,
    backup: SettingsBackup,
    _variant: PhantomData<V>,
}

pub type EditorLauncher = HostLauncher<EditorVariant>;
pub type GameLauncher = HostLauncher<GameVariant>;
pub type DedicatedServerLauncher = HostLauncher<ServerVariant>;
pub type GenericLauncher = HostLauncher<GenericVariant>;

impl<V: HostVariant> HostLauncher<V> {
    pub fn new(locator: Arc<ResourceLocator>, config: LauncherConfig) -> Self {
        let backup = SettingsBackup::new(config.output_dir.join("settings_backup"));
        Self {
            locator,
            config,
            state: LauncherState::Uninitialized,
            process: None,
            backup,
            _variant: PhantomData,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Full argument list the process is started with.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = V::args(&self.locator, &self.config);
        args.extend(self.config.args.iter().cloned());
        args
    }

    fn write_autoexec(&mut self) -> LyResult<()> {
        if !V::writes_autoexec() || self.config.autoexec.is_empty() {
            return Ok(());
        }
        let path = self.locator.autoexec_file();
        self.backup.create_backup(&path)?;
        let mut body = self.config.autoexec.join("\n");
        body.push('\n');
        std::fs::write(&path, body)?;
        tracing::debug!("wrote {} console commands to {}", self.config.autoexec.len(), path.display());
        Ok(())
    }

    fn output_file(&self) -> PathBuf {
        let stem = self
            .binary_path()
            .ok()
            .and_then(|b| b.file_stem().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "launcher".to_string());
        let base = self.config.output_dir.join(format!("{stem}_output.log"));
        collision_handled_filename(&base, DEFAULT_COLLISION_ATTEMPTS)
    }
}

impl<V: HostVariant> Drop for HostLauncher<V> {
    fn drop(&mut self) {
        if matches!(self.state, LauncherState::Prepared | LauncherState::Running)
            && let Err(e) = self.teardown()
        {
            tracing::warn!("{:?} launcher teardown on drop failed: {e}", V::KIND);
        }
    }
}

impl<V: HostVariant> Launcher for HostLauncher<V> {
    fn kind(&self) -> LauncherKind {
        V::KIND
    }

    fn state(&self) -> LauncherState {
        self.state
    }

    fn setup(&mut self) -> LyResult<()> {
        if self.state == LauncherState::Running {
            return Err(LyError::Setup(format!("{:?} launcher is already running", V::KIND)));
        }
        let binary = self.binary_path()?;
        if !binary.is_file() {
            return Err(LyError::Setup(format!("launcher binary {} does not exist", binary.display())));
        }
        self.save_settings()?;
        self.write_autoexec()?;
        if let Some(parent) = self.log_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.state = LauncherState::Prepared;
        Ok(())
    }

    fn launch(&mut self) -> LyResult<()> {
        if self.state != LauncherState::Prepared {
            return Err(LyError::Setup(format!(
                "{:?} launcher must be set up before launch (state {:?})",
                V::KIND,
                self.state
            )));
        }
        let binary = self.binary_path()?;
        let output = self.output_file();
        let process = HostProcess::spawn(&binary, &self.command_args(), self.locator.build_directory(), &output)?;
        tracing::info!("{:?} launcher running as pid {}", V::KIND, process.pid());
        self.process = Some(process);
        self.state = LauncherState::Running;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.process.as_mut().is_some_and(HostProcess::is_alive)
    }

    fn kill(&mut self) -> LyResult<()> {
        if let Some(process) = self.process.as_mut() {
            process.terminate(self.config.kill_timeout)?;
        }
        if self.state == LauncherState::Running {
            self.state = LauncherState::Stopped;
        }
        Ok(())
    }

    fn teardown(&mut self) -> LyResult<()> {
        if let Err(e) = self.kill() {
            tracing::warn!("failed to stop {:?} launcher: {e}", V::KIND);
        }
        let restored = self.restore_settings();
        self.state = LauncherState::Stopped;
        restored
    }

    fn binary_path(&self) -> LyResult<PathBuf> {
        V::binary(&self.locator, &self.config)
    }

    fn log_path(&self) -> PathBuf {
        V::log_path(&self.locator, &self.config)
    }

    fn save_settings(&mut self) -> LyResult<()> {
        for file in V::settings_files(&self.locator) {
            self.backup.create_backup(&file)?;
        }
        Ok(())
    }

    fn restore_settings(&mut self) -> LyResult<()> {
        self.backup.restore_all()
    }

    fn wait(&mut self, timeout: Duration) -> LyResult<Option<i32>> {
        match self.process.as_mut() {
            Some(process) => process.wait(timeout),
            None => Err(LyError::Setup(format!("{:?} launcher was never launched", V::KIND))),
        }
    }

    fn returncode(&self) -> Option<i32> {
        self.process.as_ref().and_then(HostProcess::returncode)
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(HostProcess::pid)
    }

    fn output(&self) -> Option<String> {
        self.process.as_ref().and_then(HostProcess::read_output)
    }
}
