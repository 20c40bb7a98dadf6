//! Crate-wide error type.

use std::path::PathBuf;

pub type LyResult<T> = Result<T, LyError>;

#[derive(Debug, thiserror::Error)]
pub enum LyError {
    /// An environment precondition was violated (missing binaries, no device, bad config).
    #[error("setup error: {0}")]
    Setup(String),

    /// A subprocess exited non-zero under a strict runner.
    #[error("command {cmd:?} exited with code {code:?}: {output}")]
    Process {
        cmd: Vec<String>,
        code: Option<i32>,
        output: String,
    },

    #[error("log monitor error: {0}")]
    LogMonitor(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    /// The watchdog worker itself failed (not the watched condition).
    #[error("watchdog error: {0}")]
    Watchdog(String),

    /// The watched condition was observed and the watchdog was told to raise.
    #[error("watchdog tripped: {name} observed {path}")]
    WatchdogTripped { name: String, path: PathBuf },

    #[error("timed out after {seconds:.1}s waiting for {what}")]
    WaitTimeout { what: String, seconds: f64 },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl LyError {
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    pub fn is_log_monitor(&self) -> bool {
        matches!(self, Self::LogMonitor(_))
    }
}
