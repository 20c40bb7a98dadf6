//! LyTestTools core library: locate engine builds, drive launchers, watch their logs and
//! collect artifacts for automated tests.

#[path = "launchers/android.rs"]
mod android;
#[path = "runtime/artifacts.rs"]
mod artifacts;
#[path = "launchers/attached.rs"]
mod attached;
#[path = "runtime/aux_service.rs"]
mod aux_service;
#[path = "runtime/backup.rs"]
mod backup;
#[path = "launchers/base.rs"]
mod base;
#[path = "runtime/clock.rs"]
mod clock;
#[path = "platform/config.rs"]
mod config;
#[path = "platform/duration.rs"]
mod duration;
#[path = "platform/envinfo.rs"]
mod envinfo;
#[path = "platform/error.rs"]
mod error;
#[path = "harness/fixtures.rs"]
mod fixtures;
#[path = "platform/fsutil.rs"]
mod fsutil;
#[path = "launchers/helper.rs"]
mod helper;
#[path = "launchers/host.rs"]
mod host;
#[path = "cmd/launch_cmd.rs"]
mod launch_cmd;
#[path = "runtime/log_monitor.rs"]
mod log_monitor;
#[path = "platform/logging.rs"]
mod logging;
#[path = "cmd/monitor_cmd.rs"]
mod monitor_cmd;
#[path = "harness/multi_test.rs"]
mod multi_test;
#[path = "runtime/paths.rs"]
mod paths;
#[path = "model/platforms.rs"]
mod platforms;
#[path = "runtime/process_utils.rs"]
mod process_utils;
#[path = "cmd/procs_cmd.rs"]
mod procs_cmd;
#[path = "model/reporting.rs"]
mod reporting;
#[path = "model/results.rs"]
mod results;
#[path = "runtime/watchdog.rs"]
mod watchdog;
#[path = "runtime/workspace.rs"]
mod workspace;

pub use android::*;
pub use artifacts::*;
pub use attached::*;
pub use aux_service::*;
pub use backup::*;
pub use base::*;
pub use clock::*;
pub use config::*;
pub use duration::*;
pub use envinfo::*;
pub use error::*;
pub use fixtures::*;
pub use fsutil::*;
pub use helper::*;
pub use host::*;
pub use launch_cmd::*;
pub use log_monitor::*;
pub use logging::*;
pub use monitor_cmd::*;
pub use multi_test::*;
pub use paths::*;
pub use platforms::*;
pub use process_utils::*;
pub use procs_cmd::*;
pub use reporting::*;
pub use results::*;
pub use watchdog::*;
pub use workspace::*;
