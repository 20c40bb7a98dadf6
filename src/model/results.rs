//! Classification of a finished launcher run.

use serde::{Deserialize, Serialize};

use std::path::Path;
use std::time::Duration;

use crate::{HumanDuration, Launcher, LyError, LyResult};

/// Exit code a test script uses to report a failed assertion, as opposed to a crash.
pub const TEST_FAIL_RETCODE: i32 = 0xF;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Pass,
    Fail,
    Crash {
        return_code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        stacktrace: Option<String>,
    },
    Timeout {
        after: HumanDuration,
    },
    Unknown {
        extra_info: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub outcome: RunOutcome,
    /// Captured stdout/stderr of the process.
    pub output: String,
    /// Content of the process log at the time of classification.
    pub log: String,
}

fn read_lossy(path: &Path) -> Option<String> {
    std::fs::read(path).ok().map(|b| String::from_utf8_lossy(&b).to_string())
}

impl RunResult {
    /// Classify an exit code: zero passes, [`TEST_FAIL_RETCODE`] fails, anything else crashed.
    pub fn from_exit(
        name: impl Into<String>,
        return_code: Option<i32>,
        output: String,
        log: String,
        crash_log: Option<&Path>,
    ) -> Self {
        let outcome = match return_code {
            Some(0) => RunOutcome::Pass,
            Some(TEST_FAIL_RETCODE) => RunOutcome::Fail,
            Some(code) => RunOutcome::Crash {
                return_code: code,
                stacktrace: crash_log.and_then(read_lossy),
            },
            None => RunOutcome::Unknown {
                extra_info: "process exited without reporting a return code".to_string(),
            },
        };
        Self {
            name: name.into(),
            outcome,
            output,
            log,
        }
    }

    /// Wait for `launcher` to exit and classify the run. A wait timeout becomes
    /// [`RunOutcome::Timeout`]; the launcher is not killed here.
    pub fn collect(
        name: impl Into<String>,
        launcher: &mut dyn Launcher,
        timeout: Duration,
        crash_log: Option<&Path>,
    ) -> LyResult<Self> {
        let name = name.into();
        let waited = launcher.wait(timeout);
        let output = launcher.output().unwrap_or_default();
        let log = read_lossy(&launcher.log_path()).unwrap_or_default();
        match waited {
            Ok(code) => Ok(Self::from_exit(name, code, output, log, crash_log)),
            Err(LyError::WaitTimeout { .. }) => Ok(Self {
                name,
                outcome: RunOutcome::Timeout {
                    after: HumanDuration(timeout),
                },
                output,
                log,
            }),
            Err(e) => Err(e),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self.outcome, RunOutcome::Pass)
    }

    pub fn headline(&self) -> String {
        match &self.outcome {
            RunOutcome::Pass => format!("{} passed", self.name),
            RunOutcome::Fail => format!("{} failed", self.name),
            RunOutcome::Crash { return_code, .. } => {
                format!("{} crashed with return code {return_code} (0x{return_code:X})", self.name)
            }
            RunOutcome::Timeout { after } => format!("{} timed out after {after}", self.name),
            RunOutcome::Unknown { extra_info } => format!("{} finished with an unknown result: {extra_info}", self.name),
        }
    }

    /// Human-readable block: headline, then output, log and any stacktrace.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.headline());
        out.push('\n');
        push_section(&mut out, "output", &self.output);
        push_section(&mut out, "log", &self.log);
        if let RunOutcome::Crash {
            stacktrace: Some(trace),
            ..
        } = &self.outcome
        {
            push_section(&mut out, "stacktrace", trace);
        }
        out.trim_end().to_string()
    }
}

fn push_section(out: &mut String, title: &str, body: &str) {
    let rule = "-".repeat(title.len() + 4);
    out.push_str(&format!("{rule}\n| {title} |\n{rule}\n"));
    if body.trim().is_empty() {
        out.push_str("-- no content --\n");
    } else {
        out.push_str(body.trim_end());
        out.push('\n');
    }
}
