//! Run many editor tests through few editor processes.
//!
//! Each test is a Python module the editor executes with `-runpythontest`. A test reports
//! itself on stdout as `JSON_START({"name": .., "success": .., "output": ..})JSON_END`, so
//! several tests can share one process and still get individual results. When a shared
//! process crashes or times out, the first test without a report takes the blame and the
//! tests after it are left [`RunOutcome::Unknown`] with a note naming the culprit.

use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    HarnessConfig, HumanDuration, LauncherConfig, LauncherKind, LyError, LyResult, ResourceLocator, RunOutcome,
    RunResult, TEST_FAIL_RETCODE, create_launcher, cycle_crash_log,
};

pub const RESULT_START: &str = "JSON_START(";
pub const RESULT_END: &str = ")JSON_END";
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_SHARED_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_EDITOR_LOG_NAME: &str = "Editor.log";
const CRASH_LOG_NAME: &str = "error.log";

/// How a list of tests is spread over editor processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One process per test, one after another.
    Single,
    /// Every test in one process.
    Batched,
    /// One process per test, up to the parallel limit at a time.
    Parallel,
    /// The tests split evenly over the parallel limit of processes, each running its share.
    ParallelBatched,
}

/// One editor test: a Python module plus how to run it.
#[derive(Debug, Clone)]
pub struct MultiTest {
    pub name: String,
    pub module: PathBuf,
    /// Bound on a process that runs only this test.
    pub timeout: Duration,
    /// Arguments added when the test runs in a process of its own.
    pub extra_args: Vec<String>,
    pub attach_debugger: bool,
    pub wait_for_debugger: bool,
}

impl MultiTest {
    pub fn new(name: impl Into<String>, module: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            timeout: DEFAULT_TEST_TIMEOUT,
            extra_args: Vec::new(),
            attach_debugger: false,
            wait_for_debugger: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name the test reports its result under: the module's file stem.
    pub fn module_name(&self) -> String {
        self.module
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ReportedResult {
    name: String,
    success: bool,
    #[serde(default)]
    output: String,
}

/// Every well-formed result report in `text`, with the byte offset just past its end marker.
fn scan_reports(text: &str) -> Vec<(ReportedResult, usize)> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(RESULT_START) {
        let body_start = cursor + offset + RESULT_START.len();
        let Some(len) = text[body_start..].find(RESULT_END) else {
            break;
        };
        let body = &text[body_start..body_start + len];
        cursor = body_start + len + RESULT_END.len();
        match serde_json::from_str::<ReportedResult>(body) {
            Ok(report) => found.push((report, cursor)),
            Err(e) => tracing::warn!("unreadable test result {body:?}: {e}"),
        }
    }
    found
}

/// Split the output and log one process shared between `tests` into a result per test.
///
/// Tests without a report come back [`RunOutcome::Unknown`] carrying the whole output.
/// Each reported test gets the slice of the log up to its own report; the last test gets
/// the rest of the log.
pub fn results_from_output(tests: &[MultiTest], output: &str, log: &str) -> Vec<RunResult> {
    let mut reported: HashMap<String, ReportedResult> =
        scan_reports(output).into_iter().map(|(r, _)| (r.name.clone(), r)).collect();
    let log_ends: HashMap<String, usize> = scan_reports(log)
        .into_iter()
        .filter(|(r, _)| reported.contains_key(&r.name))
        .map(|(r, end)| (r.name, end))
        .collect();

    let mut log_start = 0;
    tests
        .iter()
        .enumerate()
        .map(|(i, test)| {
            let key = test.module_name();
            let Some(report) = reported.remove(&key) else {
                return RunResult {
                    name: test.name.clone(),
                    outcome: RunOutcome::Unknown {
                        extra_info: format!("found no test run information on stdout for {key}"),
                    },
                    output: output.to_string(),
                    log: log.to_string(),
                };
            };
            let end = match log_ends.get(&key) {
                Some(&end) if i + 1 < tests.len() => end.max(log_start),
                _ => log.len(),
            };
            let slice = log[log_start..end].to_string();
            log_start = end;
            RunResult {
                name: test.name.clone(),
                outcome: if report.success { RunOutcome::Pass } else { RunOutcome::Fail },
                output: report.output,
                log: slice,
            }
        })
        .collect()
}

/// Pin an aborted process on the first test that never reported, or on the last test
/// when all of them did. Later unreported tests name the culprit.
fn blame_abort(results: &mut [RunResult], outcome: RunOutcome, what: &str, output: &str) {
    let culprit = results
        .iter()
        .position(|r| matches!(r.outcome, RunOutcome::Unknown { .. }))
        .or(results.len().checked_sub(1));
    let Some(idx) = culprit else {
        return;
    };
    let culprit_name = results[idx].name.clone();
    results[idx].outcome = outcome;
    results[idx].output = output.to_string();
    for later in &mut results[idx + 1..] {
        if let RunOutcome::Unknown { extra_info } = &mut later.outcome {
            *extra_info = format!("test '{culprit_name}' {what} before this test could be executed");
        }
    }
}

/// Python module and case lists for a batched run. Removed on drop.
struct BatchFiles {
    scripts: PathBuf,
    cases: PathBuf,
}

impl BatchFiles {
    fn write(tests: &[MultiTest]) -> LyResult<Self> {
        let stem = std::env::temp_dir().join(format!("lytt-batch-{}", uuid::Uuid::new_v4()));
        let files = Self {
            scripts: stem.with_extension("scripts.txt"),
            cases: stem.with_extension("cases.txt"),
        };
        let scripts: Vec<String> = tests
            .iter()
            .map(|t| t.module.display().to_string().replace('\\', "/"))
            .collect();
        let cases: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        std::fs::write(&files.scripts, scripts.join(";"))?;
        std::fs::write(&files.cases, cases.join(";"))?;
        Ok(files)
    }
}

impl Drop for BatchFiles {
    fn drop(&mut self) {
        for path in [&self.scripts, &self.cases] {
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::debug!("could not remove {}: {e}", path.display());
            }
        }
    }
}

/// Where one process of a multi-test run keeps its log and output.
struct RunSlot {
    run_id: usize,
    log_dir: PathBuf,
    output_dir: PathBuf,
}

impl RunSlot {
    fn crash_log(&self) -> PathBuf {
        self.log_dir.join(CRASH_LOG_NAME)
    }
}

struct Finished {
    return_code: Option<i32>,
    timed_out: bool,
    output: String,
    log: String,
}

fn read_lossy(path: &Path) -> String {
    std::fs::read(path)
        .map(|b| String::from_utf8_lossy(&b).to_string())
        .unwrap_or_default()
}

/// Half the cores, since the editor is itself multithreaded; at least one.
pub fn default_parallel_executables() -> usize {
    std::thread::available_parallelism().map_or(1, |n| (n.get() / 2).max(1))
}

/// Runs [`MultiTest`]s in editor processes built from one launcher template.
pub struct MultiTestRunner {
    locator: Arc<ResourceLocator>,
    template: LauncherConfig,
    parallel_executables: usize,
    shared_timeout: Duration,
    log_name: String,
    global_args: Vec<String>,
}

impl MultiTestRunner {
    pub fn new(locator: Arc<ResourceLocator>, template: LauncherConfig) -> Self {
        Self {
            locator,
            template,
            parallel_executables: default_parallel_executables(),
            shared_timeout: DEFAULT_SHARED_TIMEOUT,
            log_name: DEFAULT_EDITOR_LOG_NAME.to_string(),
            global_args: vec!["-BatchMode".to_string()],
        }
    }

    /// Runner with the parallel limit and shared timeout from `config`.
    pub fn from_harness(locator: Arc<ResourceLocator>, template: LauncherConfig, config: &HarnessConfig) -> Self {
        let runner = Self::new(locator, template).with_shared_timeout(config.shared_test_timeout.0);
        match config.parallel_executables {
            Some(n) => runner.with_parallel_executables(n),
            None => runner,
        }
    }

    pub fn with_parallel_executables(mut self, count: usize) -> Self {
        if count == 0 {
            tracing::warn!("expected 1 or more parallel executables, found 0; using 1");
        }
        self.parallel_executables = count.max(1);
        self
    }

    pub fn with_shared_timeout(mut self, timeout: Duration) -> Self {
        self.shared_timeout = timeout;
        self
    }

    pub fn with_log_name(mut self, name: impl Into<String>) -> Self {
        self.log_name = name.into();
        self
    }

    /// Arguments added to every process, ahead of per-test ones.
    pub fn with_global_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn parallel_executables(&self) -> usize {
        self.parallel_executables
    }

    /// Run `tests` the way `mode` says. Results come back in the order of `tests`.
    pub fn run(&self, mode: ExecutionMode, tests: &[MultiTest]) -> LyResult<Vec<RunResult>> {
        tracing::info!("running {} editor tests {mode:?}", tests.len());
        match mode {
            ExecutionMode::Single => tests.iter().map(|t| self.exec_single(1, t)).collect(),
            ExecutionMode::Batched => self.run_batched(tests),
            ExecutionMode::Parallel => self.run_parallel(tests),
            ExecutionMode::ParallelBatched => self.run_parallel_batched(tests),
        }
    }

    fn run_batched(&self, tests: &[MultiTest]) -> LyResult<Vec<RunResult>> {
        if tests.is_empty() {
            return Ok(Vec::new());
        }
        self.exec_multi(1, tests)
    }

    /// Waves of up to `parallel_executables` processes, one test each.
    fn run_parallel(&self, tests: &[MultiTest]) -> LyResult<Vec<RunResult>> {
        let mut results = Vec::with_capacity(tests.len());
        for wave in tests.chunks(self.parallel_executables) {
            let finished: Vec<LyResult<RunResult>> = std::thread::scope(|scope| {
                let workers: Vec<_> = wave
                    .iter()
                    .enumerate()
                    .map(|(i, test)| scope.spawn(move || self.exec_single(i + 1, test)))
                    .collect();
                workers
                    .into_iter()
                    .map(|w| w.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
                    .collect()
            });
            for result in finished {
                results.push(result?);
            }
        }
        Ok(results)
    }

    /// At most `parallel_executables` processes, each running an even share of the tests.
    fn run_parallel_batched(&self, tests: &[MultiTest]) -> LyResult<Vec<RunResult>> {
        if tests.is_empty() {
            return Ok(Vec::new());
        }
        let per_process = tests.len().div_ceil(self.parallel_executables);
        let finished: Vec<LyResult<Vec<RunResult>>> = std::thread::scope(|scope| {
            let workers: Vec<_> = tests
                .chunks(per_process)
                .enumerate()
                .map(|(i, share)| scope.spawn(move || self.exec_multi(i + 1, share)))
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
                .collect()
        });
        let mut results = Vec::with_capacity(tests.len());
        for share in finished {
            results.extend(share?);
        }
        Ok(results)
    }

    fn slot(&self, run_id: usize) -> LyResult<RunSlot> {
        let log_dir = self
            .locator
            .project_directory()
            .join("user")
            .join(format!("log_test_{run_id}"));
        std::fs::create_dir_all(&log_dir)?;
        let slot = RunSlot {
            run_id,
            log_dir,
            output_dir: self.template.output_dir.join(format!("run_{run_id}")),
        };
        std::fs::create_dir_all(&slot.output_dir)?;
        cycle_crash_log(&slot.crash_log())?;
        Ok(slot)
    }

    fn log_args(&self, slot: &RunSlot) -> Vec<String> {
        vec![
            "-logfile".to_string(),
            format!("@log@/{}", self.log_name),
            "-project-log-path".to_string(),
            slot.log_dir.display().to_string(),
        ]
    }

    fn shared_args(&self, tests: &[MultiTest]) -> Vec<String> {
        let mut args = self.global_args.clone();
        if self.template.platform.kind() == LauncherKind::Editor {
            args.push("--regset=/Amazon/Preferences/EnablePrefabSystem=true".to_string());
            let setreg = self.locator.engine_root().join("Registry").join("prefab.test.setreg");
            args.push(format!("--regset-file={}", setreg.display()));
        }
        if tests.iter().any(|t| t.attach_debugger) {
            args.push("--attach-debugger".to_string());
        }
        if tests.iter().any(|t| t.wait_for_debugger) {
            args.push("--wait-for-debugger".to_string());
        }
        args
    }

    /// Start one process with `args`, wait up to `timeout`, stop it and collect what it left.
    fn execute(&self, slot: &RunSlot, args: Vec<String>, timeout: Duration) -> LyResult<Finished> {
        let mut config = self.template.clone();
        config.args.extend(args);
        config.output_dir = slot.output_dir.clone();
        config.log_file = Some(slot.log_dir.join(&self.log_name));
        let mut launcher = create_launcher(Arc::clone(&self.locator), config);

        if let Err(e) = launcher.start() {
            if let Err(stop) = launcher.stop() {
                tracing::warn!("teardown after a failed start also failed: {stop}");
            }
            return Err(e);
        }
        let waited = launcher.wait(timeout);
        if let Err(e) = launcher.stop() {
            tracing::warn!("failed to stop editor run {}: {e}", slot.run_id);
        }
        let (return_code, timed_out) = match waited {
            Ok(code) => (code, false),
            Err(LyError::WaitTimeout { .. }) => {
                tracing::warn!("editor run {} timed out after {:.1}s", slot.run_id, timeout.as_secs_f64());
                (None, true)
            }
            Err(e) => return Err(e),
        };

        let log_path = launcher.log_path();
        let log = read_lossy(&log_path);
        if log_path.is_file() {
            let saved = slot.output_dir.join(format!("({}){}", slot.run_id, self.log_name));
            if let Err(e) = std::fs::copy(&log_path, &saved) {
                tracing::warn!("could not save {}: {e}", log_path.display());
            }
        }
        Ok(Finished {
            return_code,
            timed_out,
            output: launcher.output().unwrap_or_default(),
            log,
        })
    }

    /// Read and cycle the run's crash log, so the next run in this slot starts clean.
    fn take_crash_log(&self, slot: &RunSlot) -> Option<String> {
        let path = slot.crash_log();
        let trace = std::fs::read(&path).ok().map(|b| String::from_utf8_lossy(&b).to_string());
        match cycle_crash_log(&path) {
            Ok(Some(kept)) => {
                let saved = slot.output_dir.join(CRASH_LOG_NAME);
                if let Err(e) = std::fs::copy(&kept, &saved) {
                    tracing::warn!("could not save {}: {e}", kept.display());
                }
            }
            Ok(None) => tracing::warn!("crash occurred, but could not find log {}", path.display()),
            Err(e) => tracing::warn!("could not cycle {}: {e}", path.display()),
        }
        trace
    }

    fn exec_single(&self, run_id: usize, test: &MultiTest) -> LyResult<RunResult> {
        let slot = self.slot(run_id)?;
        let mut args = vec![
            "-runpythontest".to_string(),
            test.module.display().to_string(),
            format!("-pythontestcase={}", test.name),
        ];
        args.extend(self.log_args(&slot));
        args.extend(self.shared_args(std::slice::from_ref(test)));
        args.extend(test.extra_args.iter().cloned());

        let run = self.execute(&slot, args, test.timeout)?;
        let result = if run.timed_out {
            RunResult {
                name: test.name.clone(),
                outcome: RunOutcome::Timeout {
                    after: HumanDuration(test.timeout),
                },
                output: run.output,
                log: run.log,
            }
        } else {
            let mut result = RunResult::from_exit(&test.name, run.return_code, run.output, run.log, None);
            if let RunOutcome::Crash { stacktrace, .. } = &mut result.outcome {
                *stacktrace = self.take_crash_log(&slot);
            }
            result
        };
        tracing::info!("{}", result.headline());
        Ok(result)
    }

    fn exec_multi(&self, run_id: usize, tests: &[MultiTest]) -> LyResult<Vec<RunResult>> {
        let slot = self.slot(run_id)?;
        let batch = BatchFiles::write(tests)?;
        let mut args = vec![
            "-runpythontest".to_string(),
            batch.scripts.display().to_string(),
            "-pythontestcase".to_string(),
            batch.cases.display().to_string(),
        ];
        args.extend(self.log_args(&slot));
        args.extend(self.shared_args(tests));

        let run = self.execute(&slot, args, self.shared_timeout)?;
        drop(batch);

        let results = if run.timed_out {
            let mut results = results_from_output(tests, &run.output, &run.log);
            let timeout = RunOutcome::Timeout {
                after: HumanDuration(self.shared_timeout),
            };
            blame_abort(&mut results, timeout, "timed out", &run.output);
            results
        } else {
            match run.return_code {
                // Everything passed, nothing to pick apart.
                Some(0) => tests
                    .iter()
                    .map(|t| RunResult {
                        name: t.name.clone(),
                        outcome: RunOutcome::Pass,
                        output: run.output.clone(),
                        log: run.log.clone(),
                    })
                    .collect(),
                Some(TEST_FAIL_RETCODE) | None => results_from_output(tests, &run.output, &run.log),
                Some(code) => {
                    let mut results = results_from_output(tests, &run.output, &run.log);
                    let crash = RunOutcome::Crash {
                        return_code: code,
                        stacktrace: self.take_crash_log(&slot),
                    };
                    blame_abort(&mut results, crash, "crashed", &run.output);
                    results
                }
            }
        };
        for result in &results {
            tracing::info!("{}", result.headline());
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetPlatform, HostOs, LauncherPlatform, LocatorOptions};

    fn report(name: &str, success: bool, output: &str) -> String {
        format!(r#"JSON_START({{"name":"{name}","success":{success},"output":"{output}"}})JSON_END"#)
    }

    fn suite(names: &[&str]) -> Vec<MultiTest> {
        names
            .iter()
            .map(|n| MultiTest::new(format!("EditorSuite::{n}"), format!("tests/{n}.py")))
            .collect()
    }

    #[test]
    fn reports_are_split_per_test() {
        let tests = suite(&["test_open", "test_save", "test_close"]);
        let output = format!(
            "boot\n{}\nnoise\n{}\n",
            report("test_open", true, "opened"),
            report("test_save", false, "save failed")
        );
        let log = format!(
            "start\n{}\nsaving\n{}\ntrailer\n",
            report("test_open", true, ""),
            report("test_save", false, "")
        );
        let results = results_from_output(&tests, &output, &log);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].name, "EditorSuite::test_open");
        assert_eq!(results[0].outcome, RunOutcome::Pass);
        assert_eq!(results[0].output, "opened");
        assert!(results[0].log.starts_with("start"));
        assert!(!results[0].log.contains("saving"));
        assert_eq!(results[1].outcome, RunOutcome::Fail);
        assert!(results[1].log.contains("saving"));
        assert!(!results[1].log.contains("start"));
        assert!(matches!(&results[2].outcome, RunOutcome::Unknown { extra_info } if extra_info.contains("test_close")));
        assert_eq!(results[2].output, output);
    }

    #[test]
    fn corrupt_reports_are_skipped() {
        let tests = suite(&["test_a", "test_b"]);
        let output = format!("JSON_START({{not json}})JSON_END\n{}\nJSON_START(dangling", report("test_b", true, ""));
        let results = results_from_output(&tests, &output, "");
        assert!(matches!(results[0].outcome, RunOutcome::Unknown { .. }));
        assert_eq!(results[1].outcome, RunOutcome::Pass);
    }

    #[test]
    fn last_test_takes_the_rest_of_the_log() {
        let tests = suite(&["test_a", "test_b"]);
        let output = format!("{}{}", report("test_a", true, ""), report("test_b", true, ""));
        let log = format!("{}\n{}\nshutdown\n", report("test_a", true, ""), report("test_b", true, ""));
        let results = results_from_output(&tests, &output, &log);
        assert!(results[1].log.ends_with("shutdown\n"));
        assert_eq!(format!("{}{}", results[0].log, results[1].log), log);
    }

    #[test]
    fn abort_blames_first_unreported_test() {
        let tests = suite(&["test_a", "test_b", "test_c"]);
        let output = report("test_a", true, "");
        let mut results = results_from_output(&tests, &output, "");
        let crash = RunOutcome::Crash {
            return_code: 3,
            stacktrace: None,
        };
        blame_abort(&mut results, crash, "crashed", &output);
        assert_eq!(results[0].outcome, RunOutcome::Pass);
        assert!(matches!(results[1].outcome, RunOutcome::Crash { return_code: 3, .. }));
        match &results[2].outcome {
            RunOutcome::Unknown { extra_info } => {
                assert!(extra_info.contains("'EditorSuite::test_b' crashed"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn abort_after_every_report_blames_the_last_test() {
        let tests = suite(&["test_a", "test_b"]);
        let output = format!("{}{}", report("test_a", true, ""), report("test_b", true, ""));
        let mut results = results_from_output(&tests, &output, "");
        let timeout = RunOutcome::Timeout {
            after: HumanDuration(Duration::from_secs(1)),
        };
        blame_abort(&mut results, timeout, "timed out", &output);
        assert_eq!(results[0].outcome, RunOutcome::Pass);
        assert!(matches!(results[1].outcome, RunOutcome::Timeout { .. }));
    }

    #[test]
    fn zero_parallel_executables_means_one() {
        let root = std::env::temp_dir().join(format!("lytt-multi-zero-{}", uuid::Uuid::new_v4()));
        let (_, locator) = fake_locator(&root);
        let runner = MultiTestRunner::new(locator, LauncherConfig::new(LauncherPlatform::LinuxEditor, &root))
            .with_parallel_executables(0);
        assert_eq!(runner.parallel_executables(), 1);
        assert!(default_parallel_executables() >= 1);
    }

    fn fake_locator(root: &Path) -> (PathBuf, Arc<ResourceLocator>) {
        let project = root.join("AutomatedTesting");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::create_dir_all(root.join("build")).unwrap();
        std::fs::write(root.join("engine.json"), "{}").unwrap();
        std::fs::write(project.join("project.json"), r#"{"project_name":"AutomatedTesting"}"#).unwrap();
        let locator = ResourceLocator::new(LocatorOptions {
            build_directory: root.join("build"),
            project: "AutomatedTesting".to_string(),
            asset_platform: AssetPlatform::Linux,
            host_os: HostOs::Linux,
            engine_hint: None,
            home: Some(root.join("home")),
        })
        .unwrap();
        (project, Arc::new(locator))
    }

    /// Stand-in editor: runs the modules named on its command line. A module called
    /// `crash_*` kills the process, `hang_*` never returns and `fail_*` reports a failure.
    #[cfg(unix)]
    const FAKE_EDITOR: &str = r#"
case "$1" in
  *.txt) modules=$(tr ';' ' ' < "$1") ;;
  *) modules="$1" ;;
esac
code=0
for m in $modules; do
  n=$(basename "$m" .py)
  case "$n" in
    crash_*) echo "frame 0: $n" > "$7/error.log"; exit 3 ;;
    hang_*) sleep 30 ;;
    fail_*) echo "JSON_START({\"name\":\"$n\",\"success\":false,\"output\":\"assert failed\"})JSON_END"; code=15 ;;
    *) echo "JSON_START({\"name\":\"$n\",\"success\":true,\"output\":\"ran $n\"})JSON_END" ;;
  esac
done
exit $code
"#;

    #[cfg(unix)]
    fn fake_runner(name: &str) -> MultiTestRunner {
        let root = std::env::temp_dir().join(format!("lytt-multi-{name}-{}", uuid::Uuid::new_v4()));
        let (_, locator) = fake_locator(&root);
        let mut template = LauncherConfig::new(LauncherPlatform::LinuxGeneric, root.join("out")).with_args(["-c", FAKE_EDITOR]);
        template.binary = Some(PathBuf::from("/bin/sh"));
        template.kill_timeout = Duration::from_secs(2);
        MultiTestRunner::new(locator, template)
            .with_global_args(Vec::<String>::new())
            .with_shared_timeout(Duration::from_secs(2))
    }

    #[cfg(unix)]
    fn outcomes(results: &[RunResult]) -> Vec<&'static str> {
        results
            .iter()
            .map(|r| match r.outcome {
                RunOutcome::Pass => "pass",
                RunOutcome::Fail => "fail",
                RunOutcome::Crash { .. } => "crash",
                RunOutcome::Timeout { .. } => "timeout",
                RunOutcome::Unknown { .. } => "unknown",
            })
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn single_mode_runs_each_test_alone() {
        let runner = fake_runner("single");
        let results = runner.run(ExecutionMode::Single, &suite(&["test_a", "fail_b"])).unwrap();
        assert_eq!(outcomes(&results), ["pass", "fail"]);
        assert!(results[0].output.contains("ran test_a"));
    }

    #[cfg(unix)]
    #[test]
    fn batched_mode_splits_shared_output() {
        let runner = fake_runner("batched");
        let results = runner
            .run(ExecutionMode::Batched, &suite(&["test_a", "fail_b", "test_c"]))
            .unwrap();
        assert_eq!(outcomes(&results), ["pass", "fail", "pass"]);
        assert_eq!(results[1].output, "assert failed");

        let results = runner.run(ExecutionMode::Batched, &suite(&["test_a", "test_b"])).unwrap();
        assert_eq!(outcomes(&results), ["pass", "pass"]);
    }

    #[cfg(unix)]
    #[test]
    fn batched_crash_is_pinned_on_the_crashing_test() {
        let runner = fake_runner("crash");
        let results = runner
            .run(ExecutionMode::Batched, &suite(&["test_a", "crash_b", "test_c"]))
            .unwrap();
        assert_eq!(outcomes(&results), ["pass", "crash", "unknown"]);
        match &results[1].outcome {
            RunOutcome::Crash { return_code, stacktrace } => {
                assert_eq!(*return_code, 3);
                assert!(stacktrace.as_deref().is_some_and(|t| t.contains("frame 0: crash_b")));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn batched_timeout_is_pinned_on_the_hanging_test() {
        let runner = fake_runner("timeout");
        let results = runner
            .run(ExecutionMode::Batched, &suite(&["test_a", "hang_b", "test_c"]))
            .unwrap();
        assert_eq!(outcomes(&results), ["pass", "timeout", "unknown"]);
    }

    #[cfg(unix)]
    #[test]
    fn parallel_modes_keep_result_order() {
        let runner = fake_runner("parallel").with_parallel_executables(2);
        let tests = suite(&["test_a", "fail_b", "test_c", "test_d", "test_e"]);

        let results = runner.run(ExecutionMode::Parallel, &tests).unwrap();
        assert_eq!(outcomes(&results), ["pass", "fail", "pass", "pass", "pass"]);
        assert_eq!(results[3].name, "EditorSuite::test_d");

        let results = runner.run(ExecutionMode::ParallelBatched, &tests).unwrap();
        assert_eq!(outcomes(&results), ["pass", "fail", "pass", "pass", "pass"]);
        assert_eq!(results[4].name, "EditorSuite::test_e");

        assert!(runner.run(ExecutionMode::ParallelBatched, &[]).unwrap().is_empty());
    }
}
