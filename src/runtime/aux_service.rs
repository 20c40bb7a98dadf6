//! Long-running helper processes a test needs next to its launcher (AssetProcessor).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{AssetPlatform, HostProcess, LyError, LyResult, ResourceLocator};

pub struct AuxService {
    name: String,
    binary: PathBuf,
    args: Vec<String>,
    output_dir: PathBuf,
    stop_timeout: Duration,
    process: Option<HostProcess>,
}

impl AuxService {
    pub fn new(
        name: impl Into<String>,
        binary: impl Into<PathBuf>,
        args: Vec<String>,
        output_dir: impl Into<PathBuf>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args,
            output_dir: output_dir.into(),
            stop_timeout,
            process: None,
        }
    }

    /// The GUI asset processor for `platform`, serving the locator's project.
    pub fn asset_processor(
        locator: &ResourceLocator,
        platform: AssetPlatform,
        output_dir: &Path,
        stop_timeout: Duration,
    ) -> Self {
        let args = vec![
            format!("--project-path={}", locator.project_directory().display()),
            format!("--platforms={}", platform.as_str()),
        ];
        Self::new("AssetProcessor", locator.asset_processor(), args, output_dir, stop_timeout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(HostProcess::pid)
    }

    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(HostProcess::is_alive)
    }

    /// Start the service unless it is already running.
    pub fn start(&mut self) -> LyResult<()> {
        if self.is_running() {
            return Ok(());
        }
        if !self.binary.is_file() {
            return Err(LyError::Setup(format!(
                "{} binary {} does not exist",
                self.name,
                self.binary.display()
            )));
        }
        let cwd = self.binary.parent().unwrap_or(Path::new("."));
        let output = self.output_dir.join(format!("{}_output.log", self.name));
        self.process = Some(HostProcess::spawn(&self.binary, &self.args, cwd, &output)?);
        tracing::info!("{} started", self.name);
        Ok(())
    }

    pub fn stop(&mut self) -> LyResult<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        process.terminate(self.stop_timeout)?;
        tracing::info!("{} stopped (return code {:?})", self.name, process.returncode());
        Ok(())
    }
}

impl Drop for AuxService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("failed to stop {}: {e}", self.name);
        }
    }
}
