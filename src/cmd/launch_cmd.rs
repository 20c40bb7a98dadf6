//! `lytt launch`: one harness-managed run of the configured launcher.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    HarnessConfig, HumanDuration, LauncherPlatform, LyError, LyResult, RunOutcome, RunResult, Session,
    SessionReport,
};

#[derive(Debug, Clone, Args)]
pub struct LaunchArgs {
    /// Launcher variant; overrides `launcher_platform` from the config file.
    #[arg(long)]
    pub platform: Option<LauncherPlatform>,

    /// Executable for the generic launcher; relative paths resolve against the build directory.
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// Log file the generic launcher writes, when not `<project>/user/log/Game.log`.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Initial level (`+map <level>`).
    #[arg(long)]
    pub level: Option<String>,

    /// Line the launcher log must contain (repeatable).
    #[arg(long = "expect", value_name = "LINE")]
    pub expected: Vec<String>,

    /// Line the launcher log must not contain (repeatable).
    #[arg(long = "unexpect", value_name = "LINE")]
    pub unexpected: Vec<String>,

    #[arg(long)]
    pub halt: bool,

    #[arg(long, default_value = "120s")]
    pub timeout: HumanDuration,

    /// Test name used for the artifact folder and report.
    #[arg(long, default_value = "lytt.launch")]
    pub name: String,

    /// Wait for the process to exit and judge it by exit code. Implied when no lines are given.
    #[arg(long)]
    pub wait: bool,

    /// Start the asset processor next to the launcher.
    #[arg(long)]
    pub asset_processor: bool,

    /// Do not watch the crash log.
    #[arg(long)]
    pub no_watchdog: bool,

    /// Extra launcher arguments, after `--`.
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchOutcome {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunResult>,
    pub report: SessionReport,
}

pub fn launch_command(config: &HarnessConfig, args: &LaunchArgs) -> LyResult<LaunchOutcome> {
    let mut cfg = config.clone();
    if let Some(platform) = args.platform {
        cfg.launcher_platform = platform;
    }
    if args.level.is_some() {
        cfg.level = args.level.clone();
    }
    cfg.extra_args.extend(args.args.iter().cloned());

    let wait = args.wait || (args.expected.is_empty() && args.unexpected.is_empty());
    let timeout = args.timeout.0;
    let mut session = Session::new(cfg)?.with_test_logging();
    let mut run = None;

    let result = session.run_test(&args.name, |ctx| {
        if args.asset_processor {
            let platform = ctx.config().asset_platform();
            let stop_timeout = ctx.config().kill_timeout.0;
            ctx.workspace_mut().start_asset_processor(platform, stop_timeout)?;
        }
        if !args.no_watchdog {
            ctx.start_crash_watchdog()?;
        }
        let mut launcher_config = ctx.launcher_config();
        launcher_config.binary = args.binary.clone();
        launcher_config.log_file = args.log_file.clone();
        let id = ctx.create_launcher(launcher_config);
        ctx.launcher(id)?.start()?;

        if !wait {
            ctx.monitor_launcher_log(id, &args.expected, &args.unexpected, args.halt, timeout)?;
            return Ok(());
        }
        let crash = ctx.locator().crash_log();
        let result = RunResult::collect(&args.name, ctx.launcher(id)?, timeout, Some(&crash))?;
        tracing::info!("{}", result.headline());
        let failure = match &result.outcome {
            RunOutcome::Pass => None,
            RunOutcome::Crash { return_code, .. } => Some(Some(*return_code)),
            _ => Some(None),
        };
        let binary = ctx
            .launcher(id)?
            .binary_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| args.name.clone());
        let report = result.report();
        run = Some(result);
        match failure {
            None => Ok(()),
            Some(code) => Err(LyError::Process {
                cmd: vec![binary],
                code,
                output: report,
            }),
        }
    });
    if let Err(e) = &result {
        tracing::error!("{} failed: {e}", args.name);
    }

    let report = session.finish()?;
    Ok(LaunchOutcome {
        passed: result.is_ok(),
        run,
        report,
    })
}
