//! Per-test context: where things are, where artifacts go, which helpers are running.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    ArtifactManager, AssetPlatform, AuxService, DEFAULT_COLLISION_ATTEMPTS, LyError, LyResult, ResourceLocator,
    TestLogSink, system_time_secs,
};

pub struct Workspace {
    locator: Arc<ResourceLocator>,
    artifacts: ArtifactManager,
    asset_processor: Option<AuxService>,
    log_sink: Option<TestLogSink>,
    log_globs: Vec<String>,
    torn_down: bool,
}

impl Workspace {
    /// Create the test's artifact folder under `output_root` and route per-test logs into it.
    pub fn new(
        locator: Arc<ResourceLocator>,
        output_root: &Path,
        test_name: Option<&str>,
        log_globs: Vec<String>,
        log_sink: Option<TestLogSink>,
    ) -> LyResult<Self> {
        let mut artifacts = ArtifactManager::new(output_root)?;
        let dest = artifacts.set_dest_path(test_name, DEFAULT_COLLISION_ATTEMPTS)?;
        if let Some(sink) = &log_sink {
            sink.attach(&dest)?;
        }
        tracing::info!(
            "workspace for project {} at {}",
            locator.project_name(),
            dest.display()
        );
        Ok(Self {
            locator,
            artifacts,
            asset_processor: None,
            log_sink,
            log_globs,
            torn_down: false,
        })
    }

    pub fn locator(&self) -> &Arc<ResourceLocator> {
        &self.locator
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut ArtifactManager {
        &mut self.artifacts
    }

    /// The active test's artifact folder.
    pub fn dest_path(&self) -> &Path {
        self.artifacts.dest_path()
    }

    pub fn start_asset_processor(&mut self, platform: AssetPlatform, stop_timeout: Duration) -> LyResult<()> {
        let svc = self.asset_processor.get_or_insert_with(|| {
            AuxService::asset_processor(&self.locator, platform, self.artifacts.dest_path(), stop_timeout)
        });
        svc.start()
    }

    pub fn asset_processor(&mut self) -> Option<&mut AuxService> {
        self.asset_processor.as_mut()
    }

    /// Preserve project logs, archive the artifact folder, detach loggers, and stop helpers.
    ///
    /// Returns the archive path. Every step runs even when an earlier one fails; the first
    /// failure is returned. A second call does nothing.
    pub fn teardown(&mut self) -> LyResult<Option<PathBuf>> {
        if self.torn_down {
            return Ok(None);
        }
        self.torn_down = true;
        let mut first_err: Option<LyError> = None;
        let mut note = |step: &str, e: LyError| {
            tracing::warn!("workspace teardown: {step} failed: {e}");
            first_err.get_or_insert(e);
        };

        let project_log = self.locator.project_log();
        if project_log.is_dir() {
            match self.artifacts.save_matching(&project_log, &self.log_globs) {
                Ok(saved) => tracing::debug!("saved {} project log file(s)", saved.len()),
                Err(e) => note("saving project logs", e),
            }
        }

        if let Some(sink) = &self.log_sink {
            sink.flush();
        }

        let dest = self.artifacts.dest_path().to_path_buf();
        let mut archive = None;
        if dest != self.artifacts.artifact_root() {
            let name = dest
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "test".to_string());
            let destination = self.artifacts.artifact_root().join(format!("{name}-logs"));
            match self.artifacts.gather_artifacts(&destination) {
                Ok(zip) => archive = Some(zip),
                Err(e) => note("gathering artifacts", e),
            }
        }

        if let Some(sink) = &self.log_sink {
            sink.detach();
        }
        self.artifacts.reset();

        if let Some(mut svc) = self.asset_processor.take()
            && let Err(e) = svc.stop()
        {
            note("stopping the asset processor", e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(archive),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!("workspace teardown on drop failed: {e}");
        }
    }
}

/// Rename a leftover crash log to `error_<mtime>.log` so it cannot trip a new run's watchdog.
pub fn cycle_crash_report(locator: &ResourceLocator) -> LyResult<Option<PathBuf>> {
    cycle_crash_log(&locator.crash_log())
}

/// Rename the crash log at `crash` to `error_<mtime>.log` beside it, if there is one.
pub fn cycle_crash_log(crash: &Path) -> LyResult<Option<PathBuf>> {
    let metadata = match std::fs::metadata(crash) {
        Ok(md) => md,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mtime = metadata.modified().map(system_time_secs).unwrap_or(0);
    let base = crash.with_file_name(format!("error_{mtime}.log"));
    let target = crate::collision_handled_filename(&base, DEFAULT_COLLISION_ATTEMPTS);
    std::fs::rename(crash, &target)?;
    tracing::info!("moved stale crash log to {}", target.display());
    Ok(Some(target))
}
