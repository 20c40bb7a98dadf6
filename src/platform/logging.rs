//! Tracing setup: console output for the CLI and per-test log files for the harness.
//!
//! Each test gets `ToolsInfo.log` (INFO and above) and `ToolsDebug.log` (DEBUG and
//! above) inside its artifact folder. The subscriber is installed once per process;
//! [`TestLogSink::attach`] and [`TestLogSink::detach`] swap the target files as tests
//! start and finish.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _};

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::{LyError, LyResult};

pub const INFO_LOG_NAME: &str = "ToolsInfo.log";
pub const DEBUG_LOG_NAME: &str = "ToolsDebug.log";

#[derive(Default)]
struct SinkFiles {
    info: Option<BufWriter<File>>,
    debug: Option<BufWriter<File>>,
}

/// Routes tracing output into the files of whichever test is currently active.
#[derive(Clone, Default)]
pub struct TestLogSink {
    files: Arc<Mutex<SinkFiles>>,
}

#[derive(Clone, Copy)]
enum Channel {
    Info,
    Debug,
}

pub struct ChannelMaker {
    sink: TestLogSink,
    channel: Channel,
}

pub struct ChannelWriter {
    sink: TestLogSink,
    channel: Channel,
}

impl TestLogSink {
    /// Open (append) the per-test log files inside `dir`.
    pub fn attach(&self, dir: &Path) -> LyResult<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let info_path = dir.join(INFO_LOG_NAME);
        let debug_path = dir.join(DEBUG_LOG_NAME);
        let open = |p: &Path| -> io::Result<BufWriter<File>> {
            Ok(BufWriter::new(
                std::fs::OpenOptions::new().create(true).append(true).open(p)?,
            ))
        };
        let info = open(&info_path)?;
        let debug = open(&debug_path)?;
        let mut files = self.lock();
        files.info = Some(info);
        files.debug = Some(debug);
        Ok((info_path, debug_path))
    }

    /// Flush and close the current test's log files.
    pub fn detach(&self) {
        let mut guard = self.lock();
        let files = &mut *guard;
        for w in [files.info.as_mut(), files.debug.as_mut()].into_iter().flatten() {
            let _ = w.flush();
        }
        files.info = None;
        files.debug = None;
    }

    pub fn flush(&self) {
        let mut guard = self.lock();
        let files = &mut *guard;
        for w in [files.info.as_mut(), files.debug.as_mut()].into_iter().flatten() {
            let _ = w.flush();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.lock().info.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkFiles> {
        // A panic while holding the lock only loses buffered log lines.
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn maker(&self, channel: Channel) -> ChannelMaker {
        ChannelMaker {
            sink: self.clone(),
            channel,
        }
    }
}

impl<'a> MakeWriter<'a> for ChannelMaker {
    type Writer = ChannelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ChannelWriter {
            sink: self.sink.clone(),
            channel: self.channel,
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.sink.lock();
        let target = match self.channel {
            Channel::Info => files.info.as_mut(),
            Channel::Debug => files.debug.as_mut(),
        };
        match target {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut files = self.sink.lock();
        let target = match self.channel {
            Channel::Info => files.info.as_mut(),
            Channel::Debug => files.debug.as_mut(),
        };
        match target {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

static TEST_SINK: OnceLock<TestLogSink> = OnceLock::new();

/// Install the process-wide subscriber that feeds per-test log files.
///
/// Returns the shared sink. If another subscriber is already installed (e.g. the CLI's
/// console logger), the sink still works but receives nothing. The console shows warnings
/// and above unless `RUST_LOG` says otherwise.
pub fn init_test_logging() -> TestLogSink {
    init_test_logging_with("warn")
}

/// [`init_test_logging`] with `console_level` for the console layer; `RUST_LOG` wins.
/// Only the first call in a process installs anything.
pub fn init_test_logging_with(console_level: &str) -> TestLogSink {
    TEST_SINK
        .get_or_init(|| {
            let sink = TestLogSink::default();
            let info_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink.maker(Channel::Info))
                .with_filter(LevelFilter::INFO);
            let debug_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink.maker(Channel::Debug))
                .with_filter(LevelFilter::DEBUG);
            let console = console_filter(console_level).unwrap_or_else(|err| {
                eprintln!("warning: {err}; console logging falls back to warn");
                EnvFilter::new("warn")
            });
            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
                .with_filter(console);
            if let Err(err) = tracing_subscriber::registry()
                .with(info_layer)
                .with(debug_layer)
                .with(console_layer)
                .try_init()
            {
                eprintln!("warning: per-test logging unavailable: {err}");
            }
            sink
        })
        .clone()
}

/// Console-only tracing for the CLI; `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) -> LyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(console_filter(level)?)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| LyError::Config(format!("failed to install tracing subscriber: {e}")))
}

fn console_directive(rust_log: Option<String>, level: &str) -> String {
    rust_log.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| level.to_string())
}

fn console_filter(level: &str) -> LyResult<EnvFilter> {
    let directive = console_directive(std::env::var("RUST_LOG").ok(), level);
    EnvFilter::try_new(&directive).map_err(|e| LyError::Config(format!("invalid log filter {directive:?}: {e}")))
}
