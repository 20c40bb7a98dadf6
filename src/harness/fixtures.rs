//! Test-framework adapter: one [`Session`] per run, one [`TestContext`] per test.
//!
//! Everything a test asks for (launchers, watchdogs, helpers, ad-hoc cleanups) is
//! registered on the context before the test uses it, and torn down in reverse order
//! once the body returns, whatever the outcome.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    HarnessConfig, Launcher, LauncherConfig, LogMonitor, LyError, LyResult, MultiTestRunner, ProcessKiller,
    ResourceLocator, SessionReport, TestLogSink, TestRecord, TestStatus, Watchdog, WatchdogReport, Workspace, create_launcher,
    cycle_crash_report, env_info, init_test_logging, user_name, host_name, wall_time_iso_utc,
    write_session_report,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LauncherId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogId(usize);

type CleanupFn = Box<dyn FnOnce() -> LyResult<()>>;

enum Cleanup {
    Launcher(LauncherId),
    Watchdog(WatchdogId),
    Custom { name: String, run: CleanupFn },
}

/// Per-test resources and the LIFO cleanup stack.
pub struct TestContext {
    name: String,
    config: HarnessConfig,
    workspace: Workspace,
    launchers: Vec<Box<dyn Launcher>>,
    watchdogs: Vec<Watchdog>,
    cleanups: Vec<Cleanup>,
    record: TestRecord,
}

impl TestContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn locator(&self) -> Arc<ResourceLocator> {
        Arc::clone(self.workspace.locator())
    }

    /// Launcher settings for this test, writing captured output into its artifact folder.
    pub fn launcher_config(&self) -> LauncherConfig {
        LauncherConfig::from_harness(&self.config, self.workspace.dest_path())
    }

    /// Runner for editor tests sharing processes, with this test's launcher settings.
    pub fn multi_test_runner(&self) -> MultiTestRunner {
        MultiTestRunner::from_harness(self.locator(), self.launcher_config(), &self.config)
    }

    /// Register a launcher for teardown and hand back its id.
    pub fn add_launcher(&mut self, launcher: Box<dyn Launcher>) -> LauncherId {
        let id = LauncherId(self.launchers.len());
        self.launchers.push(launcher);
        self.cleanups.push(Cleanup::Launcher(id));
        id
    }

    /// Create and register the launcher selected by the configured platform.
    pub fn create_launcher(&mut self, config: LauncherConfig) -> LauncherId {
        let launcher = create_launcher(self.locator(), config);
        self.add_launcher(launcher)
    }

    pub fn launcher(&mut self, id: LauncherId) -> LyResult<&mut dyn Launcher> {
        match self.launchers.get_mut(id.0) {
            Some(l) => Ok(l.as_mut()),
            None => Err(LyError::InvalidArgument(format!("unknown launcher {id:?}"))),
        }
    }

    /// Monitor the launcher's own log using the session's polling settings.
    pub fn monitor_launcher_log<E, U>(
        &mut self,
        id: LauncherId,
        expected: &[E],
        unexpected: &[U],
        halt_on_unexpected: bool,
        timeout: Duration,
    ) -> LyResult<bool>
    where
        E: AsRef<str>,
        U: AsRef<str>,
    {
        let interval = self.config.poll_interval.0;
        let creation = self.config.log_creation_timeout.0;
        let launcher = self.launcher(id)?;
        let log = launcher.log_path();
        LogMonitor::new(launcher, log)
            .with_interval(interval)
            .with_creation_wait(creation)
            .monitor_log_for_lines(expected, unexpected, halt_on_unexpected, timeout)
    }

    /// Watch the project's crash log for the rest of the test.
    pub fn start_crash_watchdog(&mut self) -> LyResult<WatchdogId> {
        let crash = self.workspace.locator().crash_log();
        let mut wd = Watchdog::crash_log(crash, self.config.watchdog_interval.0, self.config.raise_on_crash);
        wd.start()?;
        let id = WatchdogId(self.watchdogs.len());
        self.watchdogs.push(wd);
        self.cleanups.push(Cleanup::Watchdog(id));
        Ok(id)
    }

    pub fn add_cleanup(&mut self, name: impl Into<String>, run: impl FnOnce() -> LyResult<()> + 'static) {
        self.cleanups.push(Cleanup::Custom {
            name: name.into(),
            run: Box::new(run),
        });
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.record.set_property(name, value);
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.record.property(name)
    }

    /// Run every registered cleanup, newest first. Returns every failure in order.
    fn run_cleanups(&mut self) -> Vec<LyError> {
        let mut failures = Vec::new();
        while let Some(step) = self.cleanups.pop() {
            let (label, result) = match step {
                Cleanup::Launcher(id) => {
                    let result = match self.launchers.get_mut(id.0) {
                        Some(l) => l.teardown(),
                        None => Ok(()),
                    };
                    (format!("launcher {}", id.0), result)
                }
                Cleanup::Watchdog(id) => {
                    let result = match self.watchdogs.get_mut(id.0) {
                        Some(wd) => wd.stop().map(|report| {
                            if let WatchdogReport::Tripped { path } = report {
                                tracing::error!("crash log {} appeared during the test", path.display());
                            }
                        }),
                        None => Ok(()),
                    };
                    (format!("watchdog {}", id.0), result)
                }
                Cleanup::Custom { name, run } => (name, run()),
            };
            if let Err(e) = result {
                tracing::warn!("teardown of {label} failed: {e}");
                failures.push(e);
            }
        }
        failures
    }
}

/// Owns configuration, output root and results for a run of tests.
pub struct Session {
    config: HarnessConfig,
    session_id: String,
    output_root: PathBuf,
    started_at: String,
    started: Instant,
    records: Vec<TestRecord>,
    log_sink: Option<TestLogSink>,
    locator: Option<Arc<ResourceLocator>>,
}

impl Session {
    pub fn new(config: HarnessConfig) -> LyResult<Self> {
        let output_root = config.resolved_output_path();
        std::fs::create_dir_all(&output_root)?;
        crate::set_owner_permissions(&output_root)?;
        tracing::info!("session output at {}", output_root.display());
        Ok(Self {
            config,
            session_id: uuid::Uuid::new_v4().to_string(),
            output_root,
            started_at: wall_time_iso_utc(),
            started: Instant::now(),
            records: Vec::new(),
            log_sink: None,
            locator: None,
        })
    }

    /// Route tracing into each test's `ToolsInfo.log` / `ToolsDebug.log`.
    pub fn with_test_logging(mut self) -> Self {
        self.log_sink = Some(init_test_logging());
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    /// The session's resource locator, resolved on first use.
    pub fn locator(&mut self) -> LyResult<Arc<ResourceLocator>> {
        if let Some(locator) = &self.locator {
            return Ok(Arc::clone(locator));
        }
        let locator = Arc::new(ResourceLocator::from_config(&self.config)?);
        self.locator = Some(Arc::clone(&locator));
        Ok(locator)
    }

    fn prepare(&mut self, name: &str) -> LyResult<TestContext> {
        let locator = self.locator()?;
        if !self.config.processes_to_kill.is_empty() {
            let mut killer = ProcessKiller::system(self.config.kill_timeout.0);
            for process in &self.config.processes_to_kill {
                killer.kill_processes_named(process, true);
            }
        }
        if let Err(e) = cycle_crash_report(&locator) {
            tracing::warn!("could not move the previous crash log aside: {e}");
        }
        let workspace = Workspace::new(
            locator,
            &self.output_root,
            Some(name),
            self.config.log_globs.clone(),
            self.log_sink.clone(),
        )?;

        let mut record = TestRecord::new(name, wall_time_iso_utc());
        record.artifact_dir = Some(workspace.dest_path().display().to_string());
        record.set_property("timestamp", record.started_at.clone());
        record.set_property("hostname", host_name());
        record.set_property("username", user_name());
        if let Some(build) = self.config.build_directory.as_deref().and_then(build_name) {
            record.set_property("build", build);
        }
        Ok(TestContext {
            name: name.to_string(),
            config: self.config.clone(),
            workspace,
            launchers: Vec::new(),
            watchdogs: Vec::new(),
            cleanups: Vec::new(),
            record,
        })
    }

    /// Run one test body with full setup and LIFO teardown, and record the result.
    ///
    /// Returns the body's error if it failed; otherwise the first teardown error, if any.
    pub fn run_test<F>(&mut self, name: &str, body: F) -> LyResult<()>
    where
        F: FnOnce(&mut TestContext) -> LyResult<()>,
    {
        let started = Instant::now();
        tracing::info!("test {name} starting");
        let mut ctx = match self.prepare(name) {
            Ok(ctx) => ctx,
            Err(e) => {
                let mut record = TestRecord::new(name, wall_time_iso_utc());
                record.status = TestStatus::Error;
                record.message = Some(e.to_string());
                record.duration_ms = started.elapsed().as_millis() as u64;
                self.records.push(record);
                return Err(e);
            }
        };

        // A panicking body (a failed assertion) still gets the full teardown below.
        let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut ctx)));
        let mut teardown_errors = ctx.run_cleanups();
        match ctx.workspace.teardown() {
            Ok(Some(archive)) => {
                if let Some(name) = archive.file_name() {
                    ctx.record.set_property("log", name.to_string_lossy().to_string());
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("workspace teardown failed: {e}");
                teardown_errors.push(e);
            }
        }

        let mut record = ctx.record;
        record.duration_ms = started.elapsed().as_millis() as u64;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                record.status = TestStatus::Failed;
                record.message = Some(format!("panicked: {}", panic_message(payload.as_ref())));
                tracing::error!("test {name} panicked");
                self.records.push(record);
                resume_unwind(payload);
            }
        };
        let result = match outcome {
            Ok(()) => match teardown_errors.into_iter().next() {
                None => Ok(()),
                Some(e) => {
                    record.status = match e {
                        LyError::WatchdogTripped { .. } => TestStatus::Failed,
                        _ => TestStatus::Error,
                    };
                    record.message = Some(e.to_string());
                    Err(e)
                }
            },
            Err(e) => {
                record.status = if e.is_setup() { TestStatus::Error } else { TestStatus::Failed };
                record.message = Some(e.to_string());
                Err(e)
            }
        };
        tracing::info!("test {name} finished: {:?}", record.status);
        self.records.push(record);
        result
    }

    /// Write `report.json` and `junit.xml` into the output root.
    pub fn finish(self) -> LyResult<SessionReport> {
        let report = SessionReport {
            schema_version: "lytt.session_report.v1".to_string(),
            session_id: self.session_id,
            started_at: self.started_at,
            finished_at: wall_time_iso_utc(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            output_root: self.output_root.display().to_string(),
            env: env_info(),
            tests: self.records,
        };
        let (json, xml) = write_session_report(&report, &self.output_root)?;
        tracing::info!("wrote {} and {}", json.display(), xml.display());
        Ok(report)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn build_name(build_directory: &Path) -> Option<String> {
    build_directory
        .components()
        .rev()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .find(|c| !matches!(c.as_str(), "bin" | "profile" | "debug" | "release" | "Profile" | "Debug" | "Release"))
}
