//! Process-table commands (`lytt procs ...`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{HarnessConfig, LyResult, ProcessInfo, ProcessKiller, ProcessTable};

#[derive(Debug, Clone, Subcommand)]
pub enum ProcsCommand {
    /// List running processes with a given name
    Exists {
        name: String,
        /// Compare names including their executable extension.
        #[arg(long)]
        exact: bool,
    },
    /// Kill every process with a given name
    Kill {
        name: String,
        #[arg(long)]
        exact: bool,
    },
    /// Kill every process whose executable lives under a directory
    KillFrom { path: PathBuf },
    /// Kill one process by pid
    KillPid {
        pid: u32,
        /// Fail when the pid is not running.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcsOutcome {
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<ProcessInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targeted: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub survivors: Vec<u32>,
}

pub fn procs_command(config: &HarnessConfig, command: &ProcsCommand) -> LyResult<ProcsOutcome> {
    procs_command_with(ProcessKiller::system(config.kill_timeout.0), command)
}

pub fn procs_command_with<T: ProcessTable>(
    mut killer: ProcessKiller<T>,
    command: &ProcsCommand,
) -> LyResult<ProcsOutcome> {
    let mut out = ProcsOutcome {
        action: String::new(),
        matched: Vec::new(),
        targeted: Vec::new(),
        survivors: Vec::new(),
    };
    match command {
        ProcsCommand::Exists { name, exact } => {
            out.action = "exists".to_string();
            out.matched = killer.find_processes_named(name, !exact);
        }
        ProcsCommand::Kill { name, exact } => {
            out.action = "kill".to_string();
            out.targeted = killer.kill_processes_named(name, !exact);
        }
        ProcsCommand::KillFrom { path } => {
            out.action = "kill-from".to_string();
            out.targeted = killer.kill_processes_started_from(path);
        }
        ProcsCommand::KillPid { pid, strict } => {
            out.action = "kill-pid".to_string();
            killer.kill_process_with_pid(*pid, *strict)?;
            out.targeted = vec![*pid];
        }
    }
    out.survivors = out
        .targeted
        .iter()
        .copied()
        .filter(|pid| killer.table_mut().is_running(*pid))
        .collect();
    Ok(out)
}
