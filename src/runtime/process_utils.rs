//! Subprocess execution and process-table operations.
//!
//! The strict runners (`check_output`, `check_call`) fail with [`LyError::Process`] on a
//! non-zero exit; the `safe_` variants log a warning and hand back what they got. Killing
//! is resilient by default: denials and already-dead targets are logged, not raised.

use serde::{Deserialize, Serialize};

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use crate::{Deadline, LyError, LyResult};

const EXECUTABLE_EXTENSIONS: [&str; 5] = ["exe", "app", "bat", "cmd", "sh"];

fn render_cmd<S: AsRef<str>>(cmd: &[S]) -> Vec<String> {
    cmd.iter().map(|s| s.as_ref().to_string()).collect()
}

fn run<S: AsRef<str>>(cmd: &[S]) -> LyResult<Output> {
    let Some((program, args)) = cmd.split_first() else {
        return Err(LyError::InvalidArgument("empty command".to_string()));
    };
    tracing::debug!("running {:?}", render_cmd(cmd));
    let output = Command::new(OsStr::new(program.as_ref()))
        .args(args.iter().map(|a| a.as_ref()))
        .output()
        .map_err(|e| {
            LyError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn {:?}: {e}", program.as_ref()),
            ))
        })?;
    Ok(output)
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

/// Run `cmd` to completion and return its stdout; non-zero exit is an error.
pub fn check_output<S: AsRef<str>>(cmd: &[S]) -> LyResult<String> {
    let output = run(cmd)?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        tracing::info!("{:?} output:\n{stdout}", render_cmd(cmd));
        Ok(stdout)
    } else {
        let text = combined(&output);
        tracing::error!("{:?} failed with {:?}:\n{text}", render_cmd(cmd), output.status.code());
        Err(LyError::Process {
            cmd: render_cmd(cmd),
            code: output.status.code(),
            output: text,
        })
    }
}

/// Run `cmd` to completion and return its exit code; non-zero exit is an error.
pub fn check_call<S: AsRef<str>>(cmd: &[S]) -> LyResult<i32> {
    let output = run(cmd)?;
    let code = output.status.code().unwrap_or(-1);
    if output.status.success() {
        tracing::info!("{:?} exited 0", render_cmd(cmd));
        Ok(code)
    } else {
        let text = combined(&output);
        tracing::error!("{:?} failed with {code}:\n{text}", render_cmd(cmd));
        Err(LyError::Process {
            cmd: render_cmd(cmd),
            code: output.status.code(),
            output: text,
        })
    }
}

/// Like [`check_output`], but a non-zero exit only warns and still returns the output.
pub fn safe_check_output<S: AsRef<str>>(cmd: &[S]) -> LyResult<String> {
    match check_output(cmd) {
        Err(LyError::Process { code, output, .. }) => {
            tracing::warn!("{:?} exited with {code:?}; continuing", render_cmd(cmd));
            Ok(output)
        }
        other => other,
    }
}

/// Like [`check_call`], but a non-zero exit only warns and still returns the code.
pub fn safe_check_call<S: AsRef<str>>(cmd: &[S]) -> LyResult<i32> {
    match check_call(cmd) {
        Err(LyError::Process { code, .. }) => {
            tracing::warn!("{:?} exited with {code:?}; continuing", render_cmd(cmd));
            Ok(code.unwrap_or(-1))
        }
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Sent,
    Denied,
    Missing,
}

/// Read/kill access to the OS process table. Snapshots may be stale by the time they are used.
pub trait ProcessTable {
    fn list(&mut self) -> Vec<ProcessInfo>;
    fn is_running(&mut self, pid: u32) -> bool;
    /// Ask for an orderly exit.
    fn terminate(&mut self, pid: u32) -> SignalOutcome;
    fn force_kill(&mut self, pid: u32) -> SignalOutcome;
}

/// [`ProcessTable`] over the live OS table.
pub struct SystemProcessTable {
    sys: sysinfo::System,
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self {
            sys: sysinfo::System::new(),
        }
    }
}

impl SystemProcessTable {
    fn signal(&mut self, pid: u32, force: bool) -> SignalOutcome {
        let spid = sysinfo::Pid::from_u32(pid);
        if !self.sys.refresh_process(spid) {
            return SignalOutcome::Missing;
        }
        let Some(process) = self.sys.process(spid) else {
            return SignalOutcome::Missing;
        };
        let sent = if force {
            process.kill()
        } else {
            process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill())
        };
        if sent { SignalOutcome::Sent } else { SignalOutcome::Denied }
    }
}

impl ProcessTable for SystemProcessTable {
    fn list(&mut self) -> Vec<ProcessInfo> {
        self.sys.refresh_processes();
        self.sys
            .processes()
            .iter()
            .map(|(pid, p)| ProcessInfo {
                pid: pid.as_u32(),
                name: full_process_name(p.name(), p.exe(), p.cmd().first().map(String::as_str)),
                exe: p.exe().map(Path::to_path_buf),
            })
            .collect()
    }

    fn is_running(&mut self, pid: u32) -> bool {
        let spid = sysinfo::Pid::from_u32(pid);
        if !self.sys.refresh_process(spid) {
            return false;
        }
        self.sys
            .process(spid)
            .is_some_and(|p| !matches!(p.status(), sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead))
    }

    fn terminate(&mut self, pid: u32) -> SignalOutcome {
        self.signal(pid, false)
    }

    fn force_kill(&mut self, pid: u32) -> SignalOutcome {
        self.signal(pid, true)
    }
}

/// The untruncated process name. Linux reports `comm`, capped at 15 bytes, so a longer
/// executable or argv[0] file name that starts with it wins.
pub fn full_process_name(name: &str, exe: Option<&Path>, argv0: Option<&str>) -> String {
    let file_name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().to_string());
    exe.and_then(file_name)
        .into_iter()
        .chain(argv0.map(Path::new).and_then(file_name))
        .find(|candidate| candidate.len() > name.len() && candidate.starts_with(name))
        .unwrap_or_else(|| name.to_string())
}

/// Strip a trailing executable extension (`.exe`, `.app`, …) when asked to.
fn comparable_name(name: &str, ignore_extensions: bool) -> String {
    let name = name.to_ascii_lowercase();
    if !ignore_extensions {
        return name;
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if EXECUTABLE_EXTENSIONS.contains(&ext) => stem.to_string(),
        _ => name,
    }
}

pub fn names_match(process_name: &str, wanted: &str, ignore_extensions: bool) -> bool {
    comparable_name(process_name, ignore_extensions) == comparable_name(wanted, ignore_extensions)
}

/// Process lookup and two-phase killing over any [`ProcessTable`].
pub struct ProcessKiller<T: ProcessTable> {
    table: T,
    timeout: Duration,
    poll: Duration,
}

impl ProcessKiller<SystemProcessTable> {
    pub fn system(timeout: Duration) -> Self {
        Self::new(SystemProcessTable::default(), timeout)
    }
}

impl<T: ProcessTable> ProcessKiller<T> {
    pub fn new(table: T, timeout: Duration) -> Self {
        Self {
            table,
            timeout,
            poll: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    pub fn find_processes_named(&mut self, name: &str, ignore_extensions: bool) -> Vec<ProcessInfo> {
        let own = std::process::id();
        self.table
            .list()
            .into_iter()
            .filter(|p| p.pid != own && names_match(&p.name, name, ignore_extensions))
            .collect()
    }

    pub fn process_exists(&mut self, name: &str, ignore_extensions: bool) -> bool {
        !self.find_processes_named(name, ignore_extensions).is_empty()
    }

    /// Kill every process whose name matches. Returns the pids that were targeted.
    pub fn kill_processes_named(&mut self, name: &str, ignore_extensions: bool) -> Vec<u32> {
        let pids: Vec<u32> = self
            .find_processes_named(name, ignore_extensions)
            .iter()
            .map(|p| p.pid)
            .collect();
        if pids.is_empty() {
            tracing::debug!("no running processes named {name}");
        } else {
            tracing::info!("killing {} process(es) named {name}: {pids:?}", pids.len());
            self.kill_pids(&pids);
        }
        pids
    }

    /// Kill every process whose executable lives under `path`.
    pub fn kill_processes_started_from(&mut self, path: &Path) -> Vec<u32> {
        let own = std::process::id();
        let pids: Vec<u32> = self
            .table
            .list()
            .into_iter()
            .filter(|p| p.pid != own && p.exe.as_deref().is_some_and(|exe| exe.starts_with(path)))
            .map(|p| p.pid)
            .collect();
        if !pids.is_empty() {
            tracing::info!("killing {} process(es) started from {}: {pids:?}", pids.len(), path.display());
            self.kill_pids(&pids);
        }
        pids
    }

    /// Kill one pid. A missing pid only warns unless `raise_on_missing` is set.
    pub fn kill_process_with_pid(&mut self, pid: u32, raise_on_missing: bool) -> LyResult<()> {
        if !self.table.is_running(pid) {
            if raise_on_missing {
                return Err(LyError::InvalidArgument(format!("no running process with pid {pid}")));
            }
            tracing::warn!("process {pid} is not running; nothing to kill");
            return Ok(());
        }
        self.kill_pids(&[pid]);
        Ok(())
    }

    /// Terminate, wait, escalate, wait. Survivors are logged; nothing here raises.
    pub fn kill_pids(&mut self, pids: &[u32]) -> Vec<u32> {
        let mut pending: Vec<u32> = Vec::new();
        for &pid in pids {
            match self.table.terminate(pid) {
                SignalOutcome::Sent => pending.push(pid),
                SignalOutcome::Missing => tracing::debug!("process {pid} already exited"),
                SignalOutcome::Denied => {
                    tracing::warn!("permission denied terminating process {pid}; trying force kill");
                    pending.push(pid);
                }
            }
        }

        let survivors = self.wait_for_exit(&pending);
        if survivors.is_empty() {
            return survivors;
        }

        for &pid in &survivors {
            match self.table.force_kill(pid) {
                SignalOutcome::Denied => tracing::warn!("permission denied force-killing process {pid}"),
                SignalOutcome::Missing | SignalOutcome::Sent => {}
            }
        }
        let survivors = self.wait_for_exit(&survivors);
        for pid in &survivors {
            tracing::warn!(
                "process {pid} still running {:.1}s after force kill; continuing",
                self.timeout.as_secs_f64()
            );
        }
        survivors
    }

    fn wait_for_exit(&mut self, pids: &[u32]) -> Vec<u32> {
        let mut remaining = pids.to_vec();
        let deadline = Deadline::after(self.timeout);
        let table = &mut self.table;
        deadline.poll_until(self.poll, || {
            remaining.retain(|&pid| table.is_running(pid));
            remaining.is_empty()
        });
        remaining
    }
}

pub fn process_exists(name: &str, ignore_extensions: bool) -> bool {
    ProcessKiller::system(Duration::from_secs(10)).process_exists(name, ignore_extensions)
}

pub fn kill_processes_named(name: &str, ignore_extensions: bool, timeout: Duration) -> Vec<u32> {
    ProcessKiller::system(timeout).kill_processes_named(name, ignore_extensions)
}

pub fn kill_processes_started_from(path: &Path, timeout: Duration) -> Vec<u32> {
    ProcessKiller::system(timeout).kill_processes_started_from(path)
}

pub fn kill_process_with_pid(pid: u32, raise_on_missing: bool, timeout: Duration) -> LyResult<()> {
    ProcessKiller::system(timeout).kill_process_with_pid(pid, raise_on_missing)
}
