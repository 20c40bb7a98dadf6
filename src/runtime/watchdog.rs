//! Poll-based background observer that trips when a file appears or changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::{LyError, LyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchCondition {
    /// Trip when the file exists.
    Appears,
    /// Trip when the file's length or mtime differs from its state at `start()`.
    Changes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

fn stamp(path: &Path) -> std::io::Result<Option<FileStamp>> {
    match std::fs::metadata(path) {
        Ok(md) => Ok(Some(FileStamp {
            len: md.len(),
            modified: md.modified().ok(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// What [`Watchdog::stop`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogReport {
    Quiet,
    Tripped { path: PathBuf },
}

struct WorkerOutcome {
    tripped: bool,
    error: Option<std::io::Error>,
}

pub struct Watchdog {
    name: String,
    target_path: PathBuf,
    interval: Duration,
    condition: WatchCondition,
    raise_on_condition: bool,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<WorkerOutcome>>,
}

impl Watchdog {
    pub fn new(
        name: impl Into<String>,
        target_path: impl Into<PathBuf>,
        condition: WatchCondition,
        interval: Duration,
        raise_on_condition: bool,
    ) -> Self {
        Self {
            name: name.into(),
            target_path: target_path.into(),
            interval,
            condition,
            raise_on_condition,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Watchdog for an engine crash log: trips when `error.log` shows up.
    pub fn crash_log(crash_log: impl Into<PathBuf>, interval: Duration, raise_on_condition: bool) -> Self {
        Self::new("crash_log_watchdog", crash_log, WatchCondition::Appears, interval, raise_on_condition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn start(&mut self) -> LyResult<()> {
        if self.worker.is_some() {
            return Err(LyError::Watchdog(format!("{} is already running", self.name)));
        }
        let baseline = match self.condition {
            WatchCondition::Appears => None,
            WatchCondition::Changes => stamp(&self.target_path)?,
        };
        self.stop_flag.store(false, Ordering::SeqCst);

        let path = self.target_path.clone();
        let interval = self.interval;
        let condition = self.condition;
        let stop = Arc::clone(&self.stop_flag);
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || watch_loop(&path, condition, baseline, interval, &stop))?;
        tracing::debug!("{} watching {}", self.name, self.target_path.display());
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and report what it saw.
    ///
    /// A tripped watchdog fails with [`LyError::WatchdogTripped`] when `raise_on_condition` is
    /// set and logs an error otherwise. Calling `stop` on a stopped watchdog is a no-op.
    pub fn stop(&mut self) -> LyResult<WatchdogReport> {
        let Some(handle) = self.worker.take() else {
            return Ok(WatchdogReport::Quiet);
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        let outcome = handle
            .join()
            .map_err(|_| LyError::Watchdog(format!("{} worker panicked", self.name)))?;

        if let Some(err) = outcome.error {
            return Err(LyError::Watchdog(format!(
                "{} failed while watching {}: {err}",
                self.name,
                self.target_path.display()
            )));
        }
        if !outcome.tripped {
            return Ok(WatchdogReport::Quiet);
        }
        if self.raise_on_condition {
            return Err(LyError::WatchdogTripped {
                name: self.name.clone(),
                path: self.target_path.clone(),
            });
        }
        tracing::error!("{} observed {}", self.name, self.target_path.display());
        Ok(WatchdogReport::Tripped {
            path: self.target_path.clone(),
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.stop_flag.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}

fn watch_loop(
    path: &Path,
    condition: WatchCondition,
    baseline: Option<FileStamp>,
    interval: Duration,
    stop: &AtomicBool,
) -> WorkerOutcome {
    let slice = interval.min(Duration::from_millis(50)).max(Duration::from_millis(1));
    loop {
        let seen = match stamp(path) {
            Ok(now) => match condition {
                WatchCondition::Appears => now.is_some(),
                WatchCondition::Changes => now != baseline,
            },
            Err(error) => {
                return WorkerOutcome {
                    tripped: false,
                    error: Some(error),
                };
            }
        };
        if seen {
            return WorkerOutcome {
                tripped: true,
                error: None,
            };
        }
        // Sleep in slices so stop() is not held up by a long interval.
        let mut slept = Duration::ZERO;
        while slept < interval {
            if stop.load(Ordering::SeqCst) {
                return WorkerOutcome {
                    tripped: false,
                    error: None,
                };
            }
            std::thread::sleep(slice);
            slept += slice;
        }
        if stop.load(Ordering::SeqCst) {
            return WorkerOutcome {
                tripped: false,
                error: None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("lytt-watchdog-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("create temp dir");
        root
    }

    fn wait_for_trip(wd: &Watchdog) {
        let deadline = crate::Deadline::after(Duration::from_secs(5));
        deadline.poll_until(Duration::from_millis(10), || !wd.is_running());
    }

    #[test]
    fn quiet_watchdog_stops_cleanly() {
        let dir = temp_dir("quiet");
        let mut wd = Watchdog::crash_log(dir.join("error.log"), Duration::from_millis(10), true);
        wd.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.stop().unwrap(), WatchdogReport::Quiet);
        assert_eq!(wd.stop().unwrap(), WatchdogReport::Quiet);
    }

    #[test]
    fn appearing_file_raises_when_configured() {
        let dir = temp_dir("raise");
        let crash = dir.join("error.log");
        let mut wd = Watchdog::crash_log(&crash, Duration::from_millis(10), true);
        wd.start().unwrap();
        std::fs::write(&crash, b"crash").unwrap();
        wait_for_trip(&wd);
        let err = wd.stop().unwrap_err();
        assert!(matches!(err, LyError::WatchdogTripped { .. }));
    }

    #[test]
    fn appearing_file_only_logs_when_not_raising() {
        let dir = temp_dir("log");
        let crash = dir.join("error.log");
        let mut wd = Watchdog::crash_log(&crash, Duration::from_millis(10), false);
        wd.start().unwrap();
        std::fs::write(&crash, b"crash").unwrap();
        wait_for_trip(&wd);
        assert_eq!(wd.stop().unwrap(), WatchdogReport::Tripped { path: crash });
    }

    #[test]
    fn change_condition_ignores_preexisting_file() {
        let dir = temp_dir("change");
        let target = dir.join("state.txt");
        std::fs::write(&target, b"before").unwrap();
        let mut wd = Watchdog::new("change", &target, WatchCondition::Changes, Duration::from_millis(10), false);
        wd.start().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(wd.is_running());
        std::fs::write(&target, b"after, and longer").unwrap();
        wait_for_trip(&wd);
        assert!(matches!(wd.stop().unwrap(), WatchdogReport::Tripped { .. }));
    }

    #[test]
    fn double_start_is_rejected() {
        let dir = temp_dir("double");
        let mut wd = Watchdog::crash_log(dir.join("error.log"), Duration::from_millis(10), false);
        wd.start().unwrap();
        assert!(matches!(wd.start(), Err(LyError::Watchdog(_))));
        wd.stop().unwrap();
    }
}
