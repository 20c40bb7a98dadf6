//! `lytt monitor`: validate a log file against expected / unexpected lines.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{AttachedLauncher, HarnessConfig, HumanDuration, LogMonitor, LyError, LyResult};

#[derive(Debug, Clone, Args)]
pub struct MonitorArgs {
    /// Log file to watch. It may not exist yet.
    #[arg(value_name = "LOG")]
    pub path: PathBuf,

    /// Line that must appear (repeatable).
    #[arg(long = "expect", value_name = "LINE")]
    pub expected: Vec<String>,

    /// Line that must not appear (repeatable).
    #[arg(long = "unexpect", value_name = "LINE")]
    pub unexpected: Vec<String>,

    /// Fail on the first unexpected line.
    #[arg(long)]
    pub halt: bool,

    #[arg(long, default_value = "30s")]
    pub timeout: HumanDuration,

    /// Stop early once this process exits.
    #[arg(long)]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorOutcome {
    pub log: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Run the monitor. Validation failures come back as a failed outcome; other errors propagate.
pub fn monitor_command(config: &HarnessConfig, args: &MonitorArgs) -> LyResult<MonitorOutcome> {
    let mut observer = AttachedLauncher::new(args.pid, &args.path, config.kill_timeout.0);
    let result = LogMonitor::new(&mut observer, &args.path)
        .with_interval(config.poll_interval.0)
        .with_creation_wait(config.log_creation_timeout.0)
        .monitor_log_for_lines(&args.expected, &args.unexpected, args.halt, args.timeout.0);
    let log = args.path.display().to_string();
    match result {
        Ok(passed) => Ok(MonitorOutcome {
            log,
            passed,
            message: None,
        }),
        Err(LyError::LogMonitor(message)) => Ok(MonitorOutcome {
            log,
            passed: false,
            message: Some(message),
        }),
        Err(e) => Err(e),
    }
}
