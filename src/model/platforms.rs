//! Platform tags: which launcher variant to build and which asset cache to use.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::LyError;

/// Operating system the engine binaries were built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOs {
    Windows,
    Linux,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Linux }
    }

    pub fn exe_suffix(self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            Self::Linux => "",
        }
    }
}

/// What kind of engine process a launcher drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    Editor,
    Game,
    DedicatedServer,
    Android,
    Generic,
}

/// Tag selecting a launcher variant, as written in config files and on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherPlatform {
    Windows,
    Linux,
    WindowsEditor,
    LinuxEditor,
    WindowsDedicated,
    LinuxDedicated,
    WindowsGeneric,
    LinuxGeneric,
    Android,
}

impl LauncherPlatform {
    const ALL: [Self; 9] = [
        Self::Windows,
        Self::Linux,
        Self::WindowsEditor,
        Self::LinuxEditor,
        Self::WindowsDedicated,
        Self::LinuxDedicated,
        Self::WindowsGeneric,
        Self::LinuxGeneric,
        Self::Android,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::WindowsEditor => "windows_editor",
            Self::LinuxEditor => "linux_editor",
            Self::WindowsDedicated => "windows_dedicated",
            Self::LinuxDedicated => "linux_dedicated",
            Self::WindowsGeneric => "windows_generic",
            Self::LinuxGeneric => "linux_generic",
            Self::Android => "android",
        }
    }

    pub fn kind(self) -> LauncherKind {
        match self {
            Self::Windows | Self::Linux => LauncherKind::Game,
            Self::WindowsEditor | Self::LinuxEditor => LauncherKind::Editor,
            Self::WindowsDedicated | Self::LinuxDedicated => LauncherKind::DedicatedServer,
            Self::WindowsGeneric | Self::LinuxGeneric => LauncherKind::Generic,
            Self::Android => LauncherKind::Android,
        }
    }

    /// Host the binaries run on; Android launchers are driven from the current host.
    pub fn host_os(self) -> HostOs {
        match self {
            Self::Windows | Self::WindowsEditor | Self::WindowsDedicated | Self::WindowsGeneric => HostOs::Windows,
            Self::Linux | Self::LinuxEditor | Self::LinuxDedicated | Self::LinuxGeneric => HostOs::Linux,
            Self::Android => HostOs::current(),
        }
    }

    pub fn default_for_host() -> Self {
        match HostOs::current() {
            HostOs::Windows => Self::Windows,
            HostOs::Linux => Self::Linux,
        }
    }
}

impl fmt::Display for LauncherPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LauncherPlatform {
    type Err = LyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
                LyError::Config(format!("unknown launcher platform {s:?} (expected one of {known:?})"))
            })
    }
}

impl clap::ValueEnum for LauncherPlatform {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// Asset pipeline platform; names the `Cache/<platform>` folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPlatform {
    Pc,
    Linux,
    Mac,
    Android,
    Ios,
    Server,
}

impl AssetPlatform {
    const ALL: [Self; 6] = [Self::Pc, Self::Linux, Self::Mac, Self::Android, Self::Ios, Self::Server];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pc => "pc",
            Self::Linux => "linux",
            Self::Mac => "mac",
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Server => "server",
        }
    }

    pub fn default_for(platform: LauncherPlatform) -> Self {
        match platform {
            LauncherPlatform::Android => Self::Android,
            LauncherPlatform::WindowsDedicated | LauncherPlatform::LinuxDedicated => Self::Server,
            other => match other.host_os() {
                HostOs::Windows => Self::Pc,
                HostOs::Linux => Self::Linux,
            },
        }
    }
}

impl fmt::Display for AssetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetPlatform {
    type Err = LyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| LyError::Config(format!("unknown asset processor platform {s:?}")))
    }
}

impl clap::ValueEnum for AssetPlatform {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}
