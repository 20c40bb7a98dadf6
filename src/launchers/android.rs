//! Launcher for a packaged game on an attached Android device, driven over adb.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    Deadline, DeviceConfig, Launcher, LauncherConfig, LauncherKind, LauncherState, LyError, LyResult,
    ResourceLocator, check_output,
};

const DEFAULT_ACTIVITY: &str = "android.app.NativeActivity";
/// Minimum time between two pulls of the device log while the app runs.
pub const DEFAULT_LOG_MIRROR_INTERVAL: Duration = Duration::from_secs(1);

/// Runs device-bridge commands and returns their stdout.
pub trait DeviceBridge {
    fn run(&mut self, args: &[String]) -> LyResult<String>;
}

/// [`DeviceBridge`] over the `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb: PathBuf,
}

impl AdbBridge {
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self { adb: adb.into() }
    }

    /// `adb` from `ANDROID_SDK_ROOT`/`ANDROID_HOME` platform-tools, else from `PATH`.
    pub fn from_env() -> Self {
        let exe = if cfg!(windows) { "adb.exe" } else { "adb" };
        for var in ["ANDROID_SDK_ROOT", "ANDROID_HOME"] {
            if let Some(root) = std::env::var_os(var) {
                let candidate = PathBuf::from(root).join("platform-tools").join(exe);
                if candidate.is_file() {
                    return Self::new(candidate);
                }
            }
        }
        Self::new(exe)
    }
}

impl DeviceBridge for AdbBridge {
    fn run(&mut self, args: &[String]) -> LyResult<String> {
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(self.adb.display().to_string());
        cmd.extend(args.iter().cloned());
        check_output(cmd.as_slice())
    }
}

/// Serials listed by `adb devices` whose state is `device` (ready).
pub fn parse_attached_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of devices") && !l.starts_with('*'))
        .filter_map(|l| {
            let mut cols = l.split_whitespace();
            let serial = cols.next()?;
            (cols.next() == Some("device")).then(|| serial.to_string())
        })
        .collect()
}

/// Find the pid of `package` in `pidof` output (later Android) or `ps` output (earlier Android).
pub fn parse_device_pid(output: &str, package: &str) -> Option<u32> {
    let trimmed = output.trim();
    if let Some(first) = trimmed.split_whitespace().next()
        && !trimmed.contains('\n')
        && let Ok(pid) = first.parse::<u32>()
    {
        return Some(pid);
    }
    trimmed.lines().find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.last() != Some(&package) {
            return None;
        }
        cols.get(1).and_then(|pid| pid.parse().ok())
    })
}

pub struct AndroidLauncher<B: DeviceBridge = AdbBridge> {
    locator: Arc<ResourceLocator>,
    config: LauncherConfig,
    bridge: B,
    state: LauncherState,
    device_id: Option<String>,
    reversed_ports: Vec<u16>,
    mirror_interval: Duration,
    last_mirror: Option<Instant>,
    /// Bytes of the device log already copied to the host log; `None` before the first pull.
    mirrored_bytes: Option<usize>,
    seen_alive: bool,
}

impl AndroidLauncher<AdbBridge> {
    pub fn new(locator: Arc<ResourceLocator>, config: LauncherConfig) -> Self {
        Self::with_bridge(locator, config, AdbBridge::from_env())
    }
}

impl<B: DeviceBridge> AndroidLauncher<B> {
    pub fn with_bridge(locator: Arc<ResourceLocator>, config: LauncherConfig, bridge: B) -> Self {
        Self {
            locator,
            config,
            bridge,
            state: LauncherState::Uninitialized,
            device_id: None,
            reversed_ports: Vec::new(),
            mirror_interval: DEFAULT_LOG_MIRROR_INTERVAL,
            last_mirror: None,
            mirrored_bytes: None,
            seen_alive: false,
        }
    }

    pub fn with_log_mirror_interval(mut self, interval: Duration) -> Self {
        self.mirror_interval = interval;
        self
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    fn package(&self) -> LyResult<&str> {
        self.config
            .package_id
            .as_deref()
            .ok_or_else(|| LyError::Setup("android launcher needs a package id".to_string()))
    }

    fn resolve_device_id(&self) -> LyResult<String> {
        if let Some(id) = &self.config.device_id {
            return Ok(id.clone());
        }
        let path = self.locator.devices_file();
        DeviceConfig::load(&path)?.android_id(&path)
    }

    fn device_cmd(&mut self, tail: &[&str]) -> LyResult<String> {
        let Some(id) = self.device_id.clone() else {
            return Err(LyError::Setup("android launcher has no device; run setup first".to_string()));
        };
        let mut args = vec!["-s".to_string(), id];
        args.extend(tail.iter().map(|s| s.to_string()));
        self.bridge.run(&args)
    }

    fn device_log(&self) -> LyResult<String> {
        Ok(format!("/sdcard/Android/data/{}/files/log/Game.log", self.package()?))
    }

    /// Copy the game log from the device to [`Launcher::log_path`].
    ///
    /// The host log only ever grows: each pull appends what the device wrote since the
    /// previous one, so a [`crate::LogMonitor`] can tail it while the app runs. If the
    /// device log shrank (the app restarted it) the host copy is rewritten.
    pub fn pull_log(&mut self) -> LyResult<PathBuf> {
        let remote = self.device_log()?;
        let local = self.log_path();
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = local.with_extension("log.pull");
        let staging_str = staging.display().to_string();
        self.last_mirror = Some(Instant::now());
        self.device_cmd(&["pull", &remote, &staging_str])?;
        let pulled = std::fs::read(&staging)?;
        if let Err(e) = std::fs::remove_file(&staging) {
            tracing::debug!("could not remove {}: {e}", staging.display());
        }

        match self.mirrored_bytes {
            Some(done) if done <= pulled.len() => {
                if done < pulled.len() {
                    OpenOptions::new().append(true).open(&local)?.write_all(&pulled[done..])?;
                }
            }
            _ => std::fs::write(&local, &pulled)?,
        }
        self.mirrored_bytes = Some(pulled.len());
        Ok(local)
    }

    fn mirror_due(&self) -> bool {
        self.last_mirror.is_none_or(|at| at.elapsed() >= self.mirror_interval)
    }

    /// Forget the previous run's host copy so its lines are never mistaken for this run's.
    fn reset_mirror(&mut self) -> LyResult<()> {
        self.last_mirror = None;
        self.mirrored_bytes = None;
        self.seen_alive = false;
        match std::fs::remove_file(self.log_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<B: DeviceBridge> Launcher for AndroidLauncher<B> {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Android
    }

    fn state(&self) -> LauncherState {
        self.state
    }

    fn setup(&mut self) -> LyResult<()> {
        self.package()?;
        let id = self.resolve_device_id()?;
        let listing = self
            .bridge
            .run(&["devices".to_string()])
            .map_err(|e| LyError::Setup(format!("could not list android devices: {e}")))?;
        let attached = parse_attached_devices(&listing);
        if !attached.contains(&id) {
            return Err(LyError::Setup(format!(
                "android device {id:?} is not attached and ready (attached: {attached:?})"
            )));
        }
        tracing::info!("using android device {id}");
        self.device_id = Some(id);

        for port in self.config.reverse_ports.clone() {
            let tunnel = format!("tcp:{port}");
            self.device_cmd(&["reverse", &tunnel, &tunnel])
                .map_err(|e| LyError::Setup(format!("failed to reverse port {port}: {e}")))?;
            self.reversed_ports.push(port);
        }
        self.state = LauncherState::Prepared;
        Ok(())
    }

    fn launch(&mut self) -> LyResult<()> {
        if self.state != LauncherState::Prepared {
            return Err(LyError::Setup(format!(
                "android launcher must be set up before launch (state {:?})",
                self.state
            )));
        }
        let package = self.package()?.to_string();
        let activity = self.config.activity.clone().unwrap_or_else(|| DEFAULT_ACTIVITY.to_string());
        let component = format!("{package}/{activity}");
        self.reset_mirror()?;
        let out = self.device_cmd(&["shell", "am", "start", "-n", &component])?;
        if out.contains("Error:") {
            return Err(LyError::Setup(format!("failed to start {component}: {}", out.trim())));
        }
        tracing::info!("started {component}");
        self.state = LauncherState::Running;
        if let Err(e) = self.pull_log() {
            tracing::debug!("device log not available yet: {e}");
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        if self.device_id.is_none() {
            return false;
        }
        let Ok(package) = self.package().map(str::to_string) else {
            return false;
        };
        let mut alive = false;
        for query in [vec!["shell", "pidof", package.as_str()], vec!["shell", "ps"]] {
            match self.device_cmd(&query) {
                Ok(out) if !out.trim().is_empty() => {
                    alive = parse_device_pid(&out, &package).is_some();
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("{query:?} failed: {e}"),
            }
        }
        if self.seen_alive && !alive {
            // The app just exited: the next refresh pulls its last lines right away.
            self.last_mirror = None;
        }
        self.seen_alive = alive;
        alive
    }

    /// Pull the device log while the app runs, at most once per mirror interval.
    fn refresh_log(&mut self) -> LyResult<()> {
        if self.state != LauncherState::Running || !self.mirror_due() {
            return Ok(());
        }
        self.pull_log().map(|_| ())
    }

    fn kill(&mut self) -> LyResult<()> {
        if self.device_id.is_some() {
            let package = self.package()?.to_string();
            self.device_cmd(&["shell", "am", "force-stop", &package])?;
        }
        if self.state == LauncherState::Running {
            self.state = LauncherState::Stopped;
        }
        Ok(())
    }

    /// Best effort: stops the app, removes port reversals and pulls the log. Never fails.
    fn teardown(&mut self) -> LyResult<()> {
        if self.device_id.is_some() {
            if self.state == LauncherState::Running
                && let Err(e) = self.pull_log()
            {
                tracing::warn!("could not pull the device log: {e}");
            }
            if let Err(e) = self.kill() {
                tracing::warn!("failed to stop the android app: {e}");
            }
            for port in std::mem::take(&mut self.reversed_ports) {
                let tunnel = format!("tcp:{port}");
                if let Err(e) = self.device_cmd(&["reverse", "--remove", &tunnel]) {
                    tracing::warn!("failed to remove port reversal {tunnel}: {e}");
                }
            }
        }
        self.state = LauncherState::Stopped;
        Ok(())
    }

    fn binary_path(&self) -> LyResult<PathBuf> {
        Err(LyError::NotImplemented(
            "android launchers run a packaged app and have no host binary".to_string(),
        ))
    }

    fn log_path(&self) -> PathBuf {
        self.locator.project_log().join("android").join("Game.log")
    }

    fn save_settings(&mut self) -> LyResult<()> {
        Ok(())
    }

    fn restore_settings(&mut self) -> LyResult<()> {
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> LyResult<Option<i32>> {
        let deadline = Deadline::after(timeout);
        if deadline.poll_until(Duration::from_millis(500), || !self.is_alive()) {
            return Ok(None);
        }
        Err(LyError::WaitTimeout {
            what: "android app to exit".to_string(),
            seconds: timeout.as_secs_f64(),
        })
    }
}
