//! `lytt.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{AssetPlatform, HumanDuration, LauncherPlatform, LyError, LyResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Absolute path to compiled engine binaries; must exist when a workspace is created.
    #[serde(default)]
    pub build_directory: Option<PathBuf>,

    /// Registered project name to resolve.
    #[serde(default)]
    pub project: Option<String>,

    /// Per-session artifact root. Defaults to `<cwd>/TestResults/<timestamp>/test_results`.
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    /// Selects the launcher variant.
    #[serde(default = "LauncherPlatform::default_for_host")]
    pub launcher_platform: LauncherPlatform,

    /// Asset pipeline platform. Derived from `launcher_platform` when unset.
    #[serde(default)]
    pub asset_processor_platform: Option<AssetPlatform>,

    /// Process names killed before each test.
    #[serde(default)]
    pub processes_to_kill: Vec<String>,

    /// Whether a tripped crash watchdog fails the test or only logs.
    #[serde(default)]
    pub raise_on_crash: bool,

    /// Initial level forwarded to game launchers as `+map <level>`.
    #[serde(default)]
    pub level: Option<String>,

    /// Where engine-root discovery starts. Defaults to the build directory.
    #[serde(default)]
    pub engine_root: Option<PathBuf>,

    /// Overrides the home directory holding `.o3de/o3de_manifest.json`.
    #[serde(default)]
    pub home_directory: Option<PathBuf>,

    /// Extra command-line arguments appended to every launch.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Console commands written to the project's `autoexec.cfg` for the test's duration.
    #[serde(default)]
    pub autoexec: Vec<String>,

    /// Pass `-rhi=Null` so launchers run without a GPU.
    #[serde(default = "default_null_renderer")]
    pub null_renderer: bool,

    /// Project-log files preserved into the artifact folder on teardown.
    #[serde(default = "default_log_globs")]
    pub log_globs: Vec<String>,

    /// Bound on every kill wait.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: HumanDuration,

    /// Log monitor polling cadence.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,

    /// How long a log monitor waits for the log file to appear.
    #[serde(default = "default_log_creation_timeout")]
    pub log_creation_timeout: HumanDuration,

    /// Crash watchdog polling cadence.
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval: HumanDuration,

    /// Android package id. Defaults to `org.o3de.<project>`.
    #[serde(default)]
    pub package_id: Option<String>,

    /// Device ports reverse-forwarded to the host during Android setup.
    #[serde(default = "default_reverse_ports")]
    pub reverse_ports: Vec<u16>,

    /// Editor processes a multi-test run keeps open at once. Defaults to half the cores.
    #[serde(default)]
    pub parallel_executables: Option<usize>,

    /// Bound on one editor process running a batch of tests.
    #[serde(default = "default_shared_test_timeout")]
    pub shared_test_timeout: HumanDuration,
}

fn default_null_renderer() -> bool {
    true
}

fn default_log_globs() -> Vec<String> {
    vec!["*.log".to_string(), "*.dmp".to_string()]
}

fn default_kill_timeout() -> HumanDuration {
    HumanDuration(Duration::from_secs(10))
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration(Duration::from_millis(100))
}

fn default_log_creation_timeout() -> HumanDuration {
    HumanDuration(Duration::from_secs(5))
}

fn default_watchdog_interval() -> HumanDuration {
    HumanDuration(Duration::from_millis(500))
}

fn default_shared_test_timeout() -> HumanDuration {
    HumanDuration(Duration::from_secs(300))
}

fn default_reverse_ports() -> Vec<u16> {
    // Asset processor connection port.
    vec![45643]
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            build_directory: None,
            project: None,
            output_path: None,
            launcher_platform: LauncherPlatform::default_for_host(),
            asset_processor_platform: None,
            processes_to_kill: Vec::new(),
            raise_on_crash: false,
            level: None,
            engine_root: None,
            home_directory: None,
            extra_args: Vec::new(),
            autoexec: Vec::new(),
            null_renderer: default_null_renderer(),
            log_globs: default_log_globs(),
            kill_timeout: default_kill_timeout(),
            poll_interval: default_poll_interval(),
            log_creation_timeout: default_log_creation_timeout(),
            watchdog_interval: default_watchdog_interval(),
            package_id: None,
            reverse_ports: default_reverse_ports(),
            parallel_executables: None,
            shared_test_timeout: default_shared_test_timeout(),
        }
    }
}

impl HarnessConfig {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<HarnessConfig>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn asset_platform(&self) -> AssetPlatform {
        self.asset_processor_platform
            .unwrap_or_else(|| AssetPlatform::default_for(self.launcher_platform))
    }

    pub fn require_build_directory(&self) -> LyResult<&Path> {
        self.build_directory
            .as_deref()
            .ok_or_else(|| LyError::Setup("build_directory is not configured".to_string()))
    }

    pub fn require_project(&self) -> LyResult<&str> {
        self.project
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| LyError::Setup("project is not configured".to_string()))
    }

    pub fn default_output_path(cwd: &Path) -> PathBuf {
        cwd.join("TestResults")
            .join(crate::filesystem_timestamp())
            .join("test_results")
    }

    pub fn resolved_output_path(&self) -> PathBuf {
        match &self.output_path {
            Some(p) => p.clone(),
            None => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                Self::default_output_path(&cwd)
            }
        }
    }

    pub fn package_id(&self) -> LyResult<String> {
        if let Some(id) = &self.package_id {
            return Ok(id.clone());
        }
        let project = self.require_project()?;
        Ok(format!("org.o3de.{}", project.to_ascii_lowercase()))
    }
}

/// Per-project device selection, read from `<project>/user/devices.toml`.
///
/// ```toml
/// [android]
/// id = "R58M1234ABC"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub android: Option<DeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
}

impl DeviceConfig {
    pub fn load(path: &Path) -> LyResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LyError::Setup(format!("failed to read device config {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            LyError::Setup(format!("malformed device config {}: {e}", path.display()))
        })
    }

    pub fn android_id(&self, path: &Path) -> LyResult<String> {
        match &self.android {
            Some(entry) if !entry.id.trim().is_empty() => Ok(entry.id.trim().to_string()),
            _ => Err(LyError::Setup(format!(
                "device config {} has no [android] id",
                path.display()
            ))),
        }
    }
}
