//! Resolve engine, project, build, cache, and log paths from disk.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{AssetPlatform, HarnessConfig, HostOs, LyError, LyResult};

pub const ENGINE_MARKER: &str = "engine.json";
pub const PROJECT_MARKER: &str = "project.json";
pub const MANIFEST_NAME: &str = "o3de_manifest.json";
pub const MAX_DISCOVERY_DEPTH: usize = 15;

/// Walk parents of `start_path` (itself included when it is a directory) looking for `engine.json`.
pub fn discover_engine_root(start_path: &Path) -> LyResult<PathBuf> {
    let start = if start_path.is_dir() {
        start_path
    } else {
        start_path.parent().unwrap_or(start_path)
    };
    for dir in start.ancestors().take(MAX_DISCOVERY_DEPTH) {
        if dir.join(ENGINE_MARKER).is_file() {
            return Ok(dir.to_path_buf());
        }
    }
    Err(LyError::Setup(format!(
        "no {ENGINE_MARKER} found within {MAX_DISCOVERY_DEPTH} levels above {}",
        start_path.display()
    )))
}

#[derive(Debug, Deserialize)]
struct ProjectJson {
    project_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestJson {
    #[serde(default)]
    projects: Vec<PathBuf>,
}

fn read_project_name(project_json: &Path) -> Option<String> {
    let bytes = std::fs::read(project_json).ok()?;
    match serde_json::from_slice::<ProjectJson>(&bytes) {
        Ok(p) => Some(p.project_name),
        Err(err) => {
            tracing::debug!("ignoring unreadable {}: {err}", project_json.display());
            None
        }
    }
}

fn project_json_matches(candidate: &Path, project_name: &str) -> bool {
    candidate.is_file() && read_project_name(candidate).is_some_and(|n| n == project_name)
}

/// Projects registered in the user-level manifest under `home/.o3de`.
pub fn manifest_projects(home: &Path) -> Vec<PathBuf> {
    let manifest = home.join(".o3de").join(MANIFEST_NAME);
    let Ok(bytes) = std::fs::read(&manifest) else {
        return Vec::new();
    };
    match serde_json::from_slice::<ManifestJson>(&bytes) {
        Ok(m) => m.projects,
        Err(err) => {
            tracing::warn!("failed to parse {}: {err}", manifest.display());
            Vec::new()
        }
    }
}

/// Locate `project.json` for `project_name`: manifest, then build-dir ancestors, then the engine folder.
pub fn resolve_project_json(
    engine_root: &Path,
    project_name: &str,
    build_directory: Option<&Path>,
    home: Option<&Path>,
) -> LyResult<PathBuf> {
    if let Some(home) = home {
        for project_dir in manifest_projects(home) {
            let candidate = project_dir.join(PROJECT_MARKER);
            if project_json_matches(&candidate, project_name) {
                tracing::debug!("resolved project {project_name} via manifest: {}", candidate.display());
                return Ok(candidate);
            }
        }
    }

    if let Some(build) = build_directory {
        for dir in build.ancestors().take(MAX_DISCOVERY_DEPTH) {
            for candidate in [dir.join(PROJECT_MARKER), dir.join(project_name).join(PROJECT_MARKER)] {
                if project_json_matches(&candidate, project_name) {
                    tracing::debug!("resolved project {project_name} from build ancestors: {}", candidate.display());
                    return Ok(candidate);
                }
            }
        }
    }

    let fallback = engine_root.join(project_name).join(PROJECT_MARKER);
    if fallback.is_file() {
        return Ok(fallback);
    }

    Err(LyError::Setup(format!(
        "could not resolve {PROJECT_MARKER} for project {project_name:?} (checked manifest, build ancestors, {})",
        fallback.display()
    )))
}

/// Inputs for [`ResourceLocator::new`].
#[derive(Debug, Clone)]
pub struct LocatorOptions {
    pub build_directory: PathBuf,
    pub project: String,
    pub asset_platform: AssetPlatform,
    pub host_os: HostOs,
    /// Where engine-root discovery starts; the build directory when unset.
    pub engine_hint: Option<PathBuf>,
    /// Home directory holding `.o3de/`; the user's home when unset.
    pub home: Option<PathBuf>,
}

impl LocatorOptions {
    pub fn from_config(cfg: &HarnessConfig) -> LyResult<Self> {
        Ok(Self {
            build_directory: cfg.require_build_directory()?.to_path_buf(),
            project: cfg.require_project()?.to_string(),
            asset_platform: cfg.asset_platform(),
            host_os: cfg.launcher_platform.host_os(),
            engine_hint: cfg.engine_root.clone(),
            home: cfg.home_directory.clone(),
        })
    }
}

/// Every filesystem location a test needs, validated once at construction.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    engine_root: PathBuf,
    project_json: PathBuf,
    project_name: String,
    build_directory: PathBuf,
    asset_platform: AssetPlatform,
    host_os: HostOs,
}

/// Serializable snapshot of a locator, printed by `lytt paths`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorPaths {
    pub engine_root: PathBuf,
    pub project_json: PathBuf,
    pub project_directory: PathBuf,
    pub build_directory: PathBuf,
    pub platform_cache: PathBuf,
    pub project_log: PathBuf,
    pub crash_log: PathBuf,
    pub editor: PathBuf,
    pub game_launcher: PathBuf,
    pub dedicated_server_launcher: PathBuf,
    pub asset_processor: PathBuf,
}

impl ResourceLocator {
    pub fn new(options: LocatorOptions) -> LyResult<Self> {
        let build_directory = std::path::absolute(&options.build_directory)?;
        if !build_directory.is_dir() {
            return Err(LyError::Setup(format!(
                "build directory does not exist: {}",
                build_directory.display()
            )));
        }

        let hint = options.engine_hint.clone().unwrap_or_else(|| build_directory.clone());
        let engine_root = discover_engine_root(&hint)?;
        let home = options.home.clone().or_else(dirs::home_dir);
        let project_json = resolve_project_json(
            &engine_root,
            &options.project,
            Some(&build_directory),
            home.as_deref(),
        )?;

        Ok(Self {
            engine_root,
            project_json,
            project_name: options.project,
            build_directory,
            asset_platform: options.asset_platform,
            host_os: options.host_os,
        })
    }

    pub fn from_config(cfg: &HarnessConfig) -> LyResult<Self> {
        Self::new(LocatorOptions::from_config(cfg)?)
    }

    pub fn engine_root(&self) -> &Path {
        &self.engine_root
    }

    pub fn project_json(&self) -> &Path {
        &self.project_json
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn project_directory(&self) -> &Path {
        self.project_json.parent().unwrap_or(&self.project_json)
    }

    pub fn build_directory(&self) -> &Path {
        &self.build_directory
    }

    pub fn asset_platform(&self) -> AssetPlatform {
        self.asset_platform
    }

    pub fn host_os(&self) -> HostOs {
        self.host_os
    }

    pub fn cache(&self) -> PathBuf {
        self.project_directory().join("Cache")
    }

    pub fn platform_cache(&self) -> PathBuf {
        self.cache().join(self.asset_platform.as_str())
    }

    pub fn project_log(&self) -> PathBuf {
        self.project_directory().join("user").join("log")
    }

    pub fn crash_log(&self) -> PathBuf {
        self.project_log().join("error.log")
    }

    pub fn editor_log(&self) -> PathBuf {
        self.project_log().join("Editor.log")
    }

    pub fn game_log(&self) -> PathBuf {
        self.project_log().join("Game.log")
    }

    pub fn server_log(&self) -> PathBuf {
        self.project_log().join("Server.log")
    }

    pub fn autoexec_file(&self) -> PathBuf {
        self.project_directory().join("autoexec.cfg")
    }

    pub fn devices_file(&self) -> PathBuf {
        self.project_directory().join("user").join("devices.toml")
    }

    fn binary(&self, name: &str) -> PathBuf {
        self.build_directory
            .join(format!("{name}{}", self.host_os.exe_suffix()))
    }

    pub fn editor(&self) -> PathBuf {
        self.binary("Editor")
    }

    pub fn game_launcher(&self) -> PathBuf {
        self.binary(&format!("{}.GameLauncher", self.project_name))
    }

    pub fn dedicated_server_launcher(&self) -> PathBuf {
        self.binary(&format!("{}.ServerLauncher", self.project_name))
    }

    pub fn asset_processor(&self) -> PathBuf {
        self.binary("AssetProcessor")
    }

    pub fn asset_processor_batch(&self) -> PathBuf {
        self.binary("AssetProcessorBatch")
    }

    pub fn describe(&self) -> LocatorPaths {
        LocatorPaths {
            engine_root: self.engine_root.clone(),
            project_json: self.project_json.clone(),
            project_directory: self.project_directory().to_path_buf(),
            build_directory: self.build_directory.clone(),
            platform_cache: self.platform_cache(),
            project_log: self.project_log(),
            crash_log: self.crash_log(),
            editor: self.editor(),
            game_launcher: self.game_launcher(),
            dedicated_server_launcher: self.dedicated_server_launcher(),
            asset_processor: self.asset_processor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("lytt-paths-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("create temp dir");
        root
    }

    fn write_project(dir: &Path, name: &str) -> PathBuf {
        std::fs::create_dir_all(dir).expect("mkdir project");
        let p = dir.join(PROJECT_MARKER);
        std::fs::write(&p, format!(r#"{{"project_name":"{name}"}}"#)).expect("write project.json");
        p
    }

    #[test]
    fn engine_root_found_from_nested_file() {
        let root = temp_dir("engine");
        std::fs::write(root.join(ENGINE_MARKER), b"{}").expect("marker");
        let nested = root.join("build").join("bin").join("profile");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let file = nested.join("Editor");
        std::fs::write(&file, b"").expect("write");
        assert_eq!(discover_engine_root(&file).unwrap(), root);
        assert_eq!(discover_engine_root(&nested).unwrap(), root);
    }

    #[test]
    fn engine_root_search_is_bounded() {
        let root = temp_dir("deep");
        std::fs::write(root.join(ENGINE_MARKER), b"{}").expect("marker");
        let mut deep = root.clone();
        for i in 0..MAX_DISCOVERY_DEPTH {
            deep = deep.join(format!("d{i}"));
        }
        std::fs::create_dir_all(&deep).expect("mkdir");
        let err = discover_engine_root(&deep).unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn manifest_wins_over_engine_fallback() {
        let root = temp_dir("manifest");
        let engine = root.join("engine");
        write_project(&engine.join("Demo"), "Demo");
        let registered = write_project(&root.join("elsewhere").join("DemoProject"), "Demo");
        let home = root.join("home");
        std::fs::create_dir_all(home.join(".o3de")).expect("mkdir");
        let manifest = serde_json::json!({ "projects": [registered.parent().unwrap()] });
        std::fs::write(home.join(".o3de").join(MANIFEST_NAME), manifest.to_string()).expect("manifest");

        let found = resolve_project_json(&engine, "Demo", None, Some(&home)).unwrap();
        assert_eq!(found, registered);
    }

    #[test]
    fn build_ancestor_then_engine_fallback() {
        let root = temp_dir("ancestor");
        let engine = root.join("engine");
        let project = root.join("Game");
        let pj = write_project(&project, "Game");
        let build = project.join("build").join("linux").join("bin").join("profile");
        std::fs::create_dir_all(&build).expect("mkdir");
        assert_eq!(resolve_project_json(&engine, "Game", Some(&build), None).unwrap(), pj);

        let other = write_project(&engine.join("Other"), "Other");
        assert_eq!(resolve_project_json(&engine, "Other", Some(&build), None).unwrap(), other);

        let err = resolve_project_json(&engine, "Missing", Some(&build), None).unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn locator_derives_paths_and_validates_build_dir() {
        let root = temp_dir("locator");
        std::fs::write(root.join(ENGINE_MARKER), b"{}").expect("marker");
        write_project(&root.join("AutomatedTesting"), "AutomatedTesting");
        let build = root.join("build").join("bin");
        std::fs::create_dir_all(&build).expect("mkdir");

        let opts = LocatorOptions {
            build_directory: build.clone(),
            project: "AutomatedTesting".to_string(),
            asset_platform: AssetPlatform::Linux,
            host_os: HostOs::Linux,
            engine_hint: None,
            home: Some(root.join("no-home")),
        };
        let loc = ResourceLocator::new(opts.clone()).unwrap();
        assert_eq!(loc.engine_root(), root.as_path());
        assert_eq!(loc.project_directory(), root.join("AutomatedTesting").as_path());
        assert_eq!(loc.platform_cache(), root.join("AutomatedTesting").join("Cache").join("linux"));
        assert_eq!(loc.game_launcher(), build.join("AutomatedTesting.GameLauncher"));
        assert_eq!(loc.crash_log(), root.join("AutomatedTesting").join("user").join("log").join("error.log"));

        let missing = LocatorOptions {
            build_directory: root.join("no-such-build"),
            ..opts
        };
        assert!(ResourceLocator::new(missing).unwrap_err().is_setup());
    }

    #[test]
    fn windows_binaries_get_exe_suffix() {
        let root = temp_dir("win");
        std::fs::write(root.join(ENGINE_MARKER), b"{}").expect("marker");
        write_project(&root.join("P"), "P");
        let build = root.join("bin");
        std::fs::create_dir_all(&build).expect("mkdir");
        let loc = ResourceLocator::new(LocatorOptions {
            build_directory: build.clone(),
            project: "P".to_string(),
            asset_platform: AssetPlatform::Pc,
            host_os: HostOs::Windows,
            engine_hint: None,
            home: Some(root.join("home")),
        })
        .unwrap();
        assert_eq!(loc.editor(), build.join("Editor.exe"));
        assert_eq!(loc.dedicated_server_launcher(), build.join("P.ServerLauncher.exe"));
    }
}
