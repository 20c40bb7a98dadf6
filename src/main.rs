//! `lytt` CLI entrypoint.

use clap::{Parser, Subcommand};

use std::path::PathBuf;
use std::process::ExitCode;

use ly_test_tools::{
    HarnessConfig, LaunchArgs, MonitorArgs, ProcsCommand, ResourceLocator, env_info, init_test_logging_with,
    init_tracing, launch_command, monitor_command, procs_command, version_info,
};

#[derive(Debug, Parser)]
#[command(name = "lytt")]
#[command(about = "drive and observe engine processes for automated tests")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "lytt.toml")]
    config: PathBuf,

    /// Working directory for execution.
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Compact single-line JSON output.
    #[arg(long, global = true)]
    json: bool,

    /// Overrides `build_directory` from the config file.
    #[arg(long, global = true)]
    build_directory: Option<PathBuf>,

    /// Overrides `project` from the config file.
    #[arg(long, global = true)]
    project: Option<String>,

    /// Overrides `output_path` from the config file.
    #[arg(long, global = true)]
    output_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve and print every engine, project and build path
    Paths,

    /// Watch a log file for expected and unexpected lines
    Monitor(MonitorArgs),

    /// Find and kill processes
    Procs {
        #[command(subcommand)]
        command: ProcsCommand,
    },

    /// Start the configured launcher under the harness, then tear down and report
    Launch(LaunchArgs),

    /// Print host identity
    Env,

    /// Print version and build info
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // `launch` routes tracing into per-test log files as well as the console.
    if matches!(cli.command, Command::Launch(_)) {
        init_test_logging_with(&cli.log);
    } else if let Err(err) = init_tracing(&cli.log) {
        eprintln!("warning: {err}");
    }

    let cwd = cli.cwd.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    if let Err(err) = std::env::set_current_dir(&cwd) {
        return print_error_and_exit(&cli, anyhow::anyhow!(err).context(format!("failed to set cwd to {}", cwd.display())));
    }

    let mut config = HarnessConfig::load_optional(&cli.config);
    if let Some(dir) = &cli.build_directory {
        config.build_directory = Some(dir.clone());
    }
    if let Some(project) = &cli.project {
        config.project = Some(project.clone());
    }
    if let Some(out) = &cli.output_path {
        config.output_path = Some(out.clone());
    }

    match run_command(&cli, &config) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn run_command(cli: &Cli, config: &HarnessConfig) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Paths => {
            let locator = ResourceLocator::from_config(config)?;
            print_json(cli, &locator.describe())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Monitor(args) => {
            let out = monitor_command(config, args)?;
            print_json(cli, &out)?;
            Ok(if out.passed { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
        Command::Procs { command } => {
            let out = procs_command(config, command)?;
            print_json(cli, &out)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Launch(args) => {
            let out = launch_command(config, args)?;
            if cli.json {
                print_json(cli, &out)?;
            } else {
                if let Some(run) = &out.run {
                    println!("{}", run.report());
                }
                println!("{}", out.report.pretty());
            }
            Ok(if out.passed { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
        Command::Env => {
            print_json(cli, &env_info())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => {
            print_json(cli, &version_info())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: serde::Serialize>(cli: &Cli, value: &T) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": "error",
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    ExitCode::from(2)
}
