//! Tail a launcher's log and validate expected / unexpected lines.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Deadline, Launcher, LyError, LyResult};

pub const DEFAULT_LOG_CREATION_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// True when `query` occurs in `line` bounded by whitespace or the line ends on both sides.
///
/// `"test 1"` matches `"9189.9998188 - INFO - [MainThread] - example.tests.test_system_example - test 1"`
/// but not `"... - test 12"`.
pub fn line_contains(line: &str, query: &str) -> bool {
    if query.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(offset) = line[start..].find(query) {
        let idx = start + offset;
        let end = idx + query.len();
        let before_ok = line[..idx].chars().next_back().is_none_or(char::is_whitespace);
        let after_ok = line[end..].chars().next().is_none_or(char::is_whitespace);
        if before_ok && after_ok {
            return true;
        }
        // Step one char so overlapping occurrences are still tried.
        start = idx + line[idx..].chars().next().map_or(1, char::len_utf8);
        if start > line.len() {
            break;
        }
    }
    false
}

/// Incremental reader over a growing file. An unterminated trailing line is held back
/// until the caller flushes, since the writer may still be in the middle of it.
struct LineTail {
    file: File,
    position: u64,
    fragment: Vec<u8>,
}

impl LineTail {
    fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            position: 0,
            fragment: Vec::new(),
        })
    }

    /// Read everything appended since the last call and return the complete lines.
    /// With `flush` the trailing fragment is returned too and the tail is drained.
    fn next_lines(&mut self, flush: bool) -> std::io::Result<Vec<String>> {
        let len = self.file.metadata()?.len();
        if len < self.position {
            tracing::debug!("log truncated from {} to {len} bytes, rereading", self.position);
            self.position = 0;
            self.fragment.clear();
        }
        self.file.seek(SeekFrom::Start(self.position))?;
        let mut fresh = Vec::new();
        let read = self.file.read_to_end(&mut fresh)?;
        self.position += read as u64;

        let mut lines = Vec::new();
        self.fragment.extend_from_slice(&fresh);
        while let Some(nl) = self.fragment.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.fragment.drain(..=nl).collect();
            lines.push(decode_line(&raw));
        }
        if flush && !self.fragment.is_empty() {
            lines.push(decode_line(&self.fragment));
            self.fragment.clear();
        }
        Ok(lines)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Watches one launcher's log for expected and unexpected lines.
pub struct LogMonitor<'a> {
    launcher: &'a mut dyn Launcher,
    log_file_path: PathBuf,
    log_creation_max_wait: Duration,
    interval: Duration,
}

impl<'a> LogMonitor<'a> {
    pub fn new(launcher: &'a mut dyn Launcher, log_file_path: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            log_file_path: log_file_path.into(),
            log_creation_max_wait: DEFAULT_LOG_CREATION_WAIT,
            interval: DEFAULT_MONITOR_INTERVAL,
        }
    }

    pub fn with_creation_wait(mut self, wait: Duration) -> Self {
        self.log_creation_max_wait = wait;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }

    /// Scan the log until every expected line has been seen, the launcher exits, or
    /// `timeout` passes. After the launcher exits one more full pass is made.
    ///
    /// Returns `Ok(true)` when every expected line was found and no unexpected line was;
    /// otherwise fails with [`LyError::LogMonitor`] naming what was missing and what was
    /// found. With `halt_on_unexpected` the first unexpected line fails immediately.
    pub fn monitor_log_for_lines<E, U>(
        &mut self,
        expected_lines: &[E],
        unexpected_lines: &[U],
        halt_on_unexpected: bool,
        timeout: Duration,
    ) -> LyResult<bool>
    where
        E: AsRef<str>,
        U: AsRef<str>,
    {
        let expected = dedup(expected_lines);
        let unexpected = dedup(unexpected_lines);
        validate_queries(&expected, &unexpected)?;

        self.wait_for_log_creation()?;
        let mut tail = LineTail::open(&self.log_file_path)?;
        let mut scan = Scan {
            missing: expected.clone(),
            unexpected: &unexpected,
            found_unexpected: Vec::new(),
            halt_on_unexpected,
        };

        tracing::info!(
            "monitoring {} for {} expected and {} unexpected lines",
            self.log_file_path.display(),
            expected.len(),
            unexpected.len()
        );

        let deadline = Deadline::after(timeout);
        let mut final_pass = true;
        loop {
            if !self.launcher.is_alive() {
                tracing::debug!("launcher exited, making a final pass over {}", self.log_file_path.display());
                break;
            }
            if deadline.expired() {
                tracing::warn!(
                    "log monitor timed out after {:.1}s on {}",
                    deadline.elapsed().as_secs_f64(),
                    self.log_file_path.display()
                );
                break;
            }
            self.refresh_log();
            scan.feed(tail.next_lines(false)?)?;
            if !expected.is_empty() && scan.missing.is_empty() {
                final_pass = false;
                break;
            }
            deadline.sleep(self.interval);
        }

        // Lines written since the last read, plus an unterminated last line, once nothing
        // more is coming: the launcher is gone or the deadline has passed.
        if final_pass {
            self.refresh_log();
            scan.feed(tail.next_lines(true)?)?;
        }

        scan.into_result(&expected, &unexpected)
    }

    fn refresh_log(&mut self) {
        if let Err(e) = self.launcher.refresh_log() {
            tracing::debug!("could not refresh {}: {e}", self.log_file_path.display());
        }
    }

    fn wait_for_log_creation(&mut self) -> LyResult<()> {
        let path = &self.log_file_path;
        let launcher = &mut *self.launcher;
        let deadline = Deadline::after(self.log_creation_max_wait);
        let created = deadline.poll_until(self.interval, || {
            if let Err(e) = launcher.refresh_log() {
                tracing::debug!("could not refresh {}: {e}", path.display());
            }
            path.exists()
        });
        if created {
            return Ok(());
        }
        Err(LyError::LogMonitor(format!(
            "log file {} was not created within {:.1}s",
            path.display(),
            self.log_creation_max_wait.as_secs_f64()
        )))
    }
}

struct Scan<'q> {
    missing: Vec<String>,
    unexpected: &'q [String],
    found_unexpected: Vec<String>,
    halt_on_unexpected: bool,
}

impl Scan<'_> {
    fn feed(&mut self, lines: Vec<String>) -> LyResult<()> {
        for line in lines {
            self.missing.retain(|query| {
                let hit = line_contains(&line, query);
                if hit {
                    tracing::info!("found expected line {query:?}");
                }
                !hit
            });
            for query in self.unexpected {
                if !line_contains(&line, query) {
                    continue;
                }
                if self.halt_on_unexpected {
                    return Err(LyError::LogMonitor(format!(
                        "unexpected line {query:?} found, halting: {line}"
                    )));
                }
                if !self.found_unexpected.contains(query) {
                    tracing::warn!("found unexpected line {query:?}");
                    self.found_unexpected.push(query.clone());
                }
            }
        }
        Ok(())
    }

    fn into_result(self, expected: &[String], unexpected: &[String]) -> LyResult<bool> {
        if self.missing.is_empty() && self.found_unexpected.is_empty() {
            return Ok(true);
        }
        Err(LyError::LogMonitor(format!(
            "log validation failed. expected lines not found: {:?}; unexpected lines found: {:?} \
             (expected {:?}, unexpected {:?})",
            self.missing, self.found_unexpected, expected, unexpected
        )))
    }
}

fn dedup<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    lines
        .iter()
        .map(|l| l.as_ref().to_string())
        .filter(|l| seen.insert(l.clone()))
        .collect()
}

fn validate_queries(expected: &[String], unexpected: &[String]) -> LyResult<()> {
    if expected.is_empty() && unexpected.is_empty() {
        return Err(LyError::LogMonitor(
            "nothing to monitor: both expected and unexpected lines are empty".to_string(),
        ));
    }
    if expected.iter().chain(unexpected).any(|l| l.trim().is_empty()) {
        return Err(LyError::LogMonitor(format!(
            "empty line queries are not allowed (expected {expected:?}, unexpected {unexpected:?})"
        )));
    }
    let overlap: Vec<&String> = expected.iter().filter(|l| unexpected.contains(l)).collect();
    if !overlap.is_empty() {
        return Err(LyError::LogMonitor(format!(
            "lines {overlap:?} are both expected and unexpected (expected {expected:?}, unexpected {unexpected:?})"
        )));
    }
    if expected.is_empty() {
        tracing::warn!("no expected lines given, monitoring only for unexpected lines");
    }
    Ok(())
}
