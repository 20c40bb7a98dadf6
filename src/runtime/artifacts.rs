//! Per-test artifact storage: collision-free folders, preserved files, log archives.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::{LyError, LyResult};

/// Longest artifact stem kept when saving; longer names are cut to respect path limits.
pub const MAX_ARTIFACT_NAME_CHARS: usize = 25;

/// Numbering ceiling used when saving individual files.
pub const DEFAULT_COLLISION_ATTEMPTS: usize = 1000;

/// First free name among `base`, `base_1`, … `base_{max_attempts-1}`.
///
/// With `max_attempts <= 1` the base is returned as-is. When every candidate is taken the
/// last one is returned anyway.
pub fn collision_handled_filename(base: &Path, max_attempts: usize) -> PathBuf {
    collision_handled_with(base, max_attempts, false, |p| p.exists())
}

fn collision_handled_with(
    base: &Path,
    max_attempts: usize,
    keep_extension: bool,
    is_taken: impl Fn(&Path) -> bool,
) -> PathBuf {
    if max_attempts <= 1 || !is_taken(base) {
        return base.to_path_buf();
    }

    let parent = base.parent().unwrap_or_else(|| Path::new(""));
    let file_name = base
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let (stem, ext) = match (keep_extension, file_name.rfind('.')) {
        (true, Some(dot)) if dot > 0 => (file_name[..dot].to_string(), Some(file_name[dot + 1..].to_string())),
        _ => (file_name.clone(), None),
    };

    let mut candidate = base.to_path_buf();
    for n in 1..max_attempts {
        let name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        candidate = parent.join(name);
        if !is_taken(&candidate) {
            return candidate;
        }
    }
    tracing::warn!(
        "exhausted {max_attempts} names for {}; reusing {}",
        base.display(),
        candidate.display()
    );
    candidate
}

#[derive(Debug)]
pub struct ArtifactManager {
    artifact_root: PathBuf,
    dest_path: PathBuf,
    reserved: BTreeSet<PathBuf>,
}

impl ArtifactManager {
    pub fn new(artifact_root: impl Into<PathBuf>) -> LyResult<Self> {
        let artifact_root = artifact_root.into();
        std::fs::create_dir_all(&artifact_root)?;
        Ok(Self {
            dest_path: artifact_root.clone(),
            artifact_root,
            reserved: BTreeSet::new(),
        })
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }

    fn is_taken(&self, p: &Path) -> bool {
        p.exists() || self.reserved.contains(p)
    }

    /// Point the manager at `artifact_root/<test_name>` (or the root itself) and create it.
    ///
    /// With `amount > 1` an existing folder is not reused: the first free `<name>_<n>` is taken.
    pub fn set_dest_path(&mut self, test_name: Option<&str>, amount: usize) -> LyResult<PathBuf> {
        let base = match test_name {
            Some(name) if !name.trim().is_empty() => self.artifact_root.join(sanitize_component(name)),
            _ => self.artifact_root.clone(),
        };
        let dest = if test_name.is_some() {
            collision_handled_with(&base, amount, false, |p| self.is_taken(p))
        } else {
            base
        };
        std::fs::create_dir_all(&dest)?;
        crate::set_owner_permissions(&dest)?;
        self.reserved.insert(dest.clone());
        tracing::debug!("artifact destination set to {}", dest.display());
        self.dest_path = dest.clone();
        Ok(dest)
    }

    /// Return to the session root; the previous test folder is left on disk.
    pub fn reset(&mut self) {
        self.dest_path = self.artifact_root.clone();
    }

    /// Copy a file or directory tree from `source` into the destination folder.
    pub fn save_artifact(&mut self, source: &Path, artifact_name: Option<&str>) -> LyResult<PathBuf> {
        if !source.exists() {
            return Err(LyError::Artifact(format!(
                "cannot save missing artifact {}",
                source.display()
            )));
        }
        let raw_name = match artifact_name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => source
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| LyError::Artifact(format!("artifact has no file name: {}", source.display())))?,
        };
        let name = crate::truncate_file_name(&sanitize_component(&raw_name), MAX_ARTIFACT_NAME_CHARS);
        std::fs::create_dir_all(&self.dest_path)?;

        if source.is_dir() {
            let target = self.dest_path.join(&name);
            let files = crate::copy_tree_overwrite(source, &target)?;
            tracing::info!("saved directory artifact {} -> {} ({files} files)", source.display(), target.display());
            return Ok(target);
        }

        let base = self.dest_path.join(&name);
        let target = collision_handled_with(&base, DEFAULT_COLLISION_ATTEMPTS, true, |p| self.is_taken(p));
        crate::copy_file_overwrite(source, &target)?;
        self.reserved.insert(target.clone());
        tracing::info!("saved artifact {} -> {}", source.display(), target.display());
        Ok(target)
    }

    /// Save every file below `dir` matching one of `patterns`; a missing `dir` saves nothing.
    pub fn save_matching(&mut self, dir: &Path, patterns: &[String]) -> LyResult<Vec<PathBuf>> {
        let mut saved = Vec::new();
        for file in crate::find_matching_files(dir, patterns)? {
            saved.push(self.save_artifact(&file, None)?);
        }
        Ok(saved)
    }

    /// Reserve a fresh path inside the destination folder for the caller to write.
    pub fn generate_artifact_file_name(&mut self, name: &str) -> LyResult<PathBuf> {
        if name.trim().is_empty() {
            return Err(LyError::Artifact("artifact file name must not be empty".to_string()));
        }
        std::fs::create_dir_all(&self.dest_path)?;
        let base = self.dest_path.join(sanitize_component(name));
        let path = collision_handled_with(&base, DEFAULT_COLLISION_ATTEMPTS, true, |p| self.is_taken(p));
        self.reserved.insert(path.clone());
        Ok(path)
    }

    /// Zip the destination folder into `<destination>.zip`.
    pub fn gather_artifacts(&self, destination: &Path) -> LyResult<PathBuf> {
        let mut zip_name = destination.as_os_str().to_os_string();
        zip_name.push(".zip");
        let out = PathBuf::from(zip_name);
        let count = crate::zip_directory(&self.dest_path, &out)?;
        tracing::info!("gathered {count} artifacts from {} into {}", self.dest_path.display(), out.display());
        Ok(out)
    }
}

/// Keep artifact names to a single path component.
fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lytt-artifacts-{name}-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn collision_names_count_up_from_one() {
        let root = temp_root("names");
        let mut am = ArtifactManager::new(&root).unwrap();
        let a = am.set_dest_path(Some("t"), 3).unwrap();
        let b = am.set_dest_path(Some("t"), 3).unwrap();
        let c = am.set_dest_path(Some("t"), 3).unwrap();
        assert_eq!(a, root.join("t"));
        assert_eq!(b, root.join("t_1"));
        assert_eq!(c, root.join("t_2"));
    }

    #[test]
    fn collision_ceiling_reuses_last_candidate() {
        let root = temp_root("ceiling");
        std::fs::create_dir_all(root.join("x")).unwrap();
        std::fs::create_dir_all(root.join("x_1")).unwrap();
        assert_eq!(collision_handled_filename(&root.join("x"), 2), root.join("x_1"));
        assert_eq!(collision_handled_filename(&root.join("x"), 1), root.join("x"));
        assert_eq!(collision_handled_filename(&root.join("y"), 5), root.join("y"));
    }

    #[test]
    fn amount_one_reuses_existing_folder() {
        let root = temp_root("reuse");
        let mut am = ArtifactManager::new(&root).unwrap();
        let a = am.set_dest_path(Some("same"), 1).unwrap();
        let b = am.set_dest_path(Some("same"), 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn saving_a_file_twice_keeps_both_copies() {
        let root = temp_root("file");
        let src_dir = temp_root("file-src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src = src_dir.join("Game.log");
        std::fs::write(&src, b"first").unwrap();

        let mut am = ArtifactManager::new(&root).unwrap();
        am.set_dest_path(Some("test_file"), 1).unwrap();
        let first = am.save_artifact(&src, None).unwrap();
        std::fs::write(&src, b"second").unwrap();
        let second = am.save_artifact(&src, None).unwrap();

        assert_eq!(first.file_name().unwrap(), "Game.log");
        assert_eq!(second.file_name().unwrap(), "Game_1.log");
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
    }

    #[test]
    fn saving_a_directory_twice_merges() {
        let root = temp_root("dir");
        let src = temp_root("dir-src");
        std::fs::create_dir_all(src.join("inner")).unwrap();
        std::fs::write(src.join("inner").join("a.txt"), b"a").unwrap();

        let mut am = ArtifactManager::new(&root).unwrap();
        am.set_dest_path(Some("test_dir"), 1).unwrap();
        let target = am.save_artifact(&src, Some("captures")).unwrap();
        std::fs::write(target.join("extra.txt"), b"kept").unwrap();
        let again = am.save_artifact(&src, Some("captures")).unwrap();

        assert_eq!(target, again);
        assert!(again.join("inner").join("a.txt").is_file());
        assert_eq!(std::fs::read(again.join("extra.txt")).unwrap(), b"kept");
    }

    #[test]
    fn long_names_are_truncated() {
        let root = temp_root("long");
        let src_dir = temp_root("long-src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src = src_dir.join("x.txt");
        std::fs::write(&src, b"x").unwrap();
        let mut am = ArtifactManager::new(&root).unwrap();
        let saved = am
            .save_artifact(&src, Some("a_really_long_artifact_name_that_goes_on.txt"))
            .unwrap();
        let stem = saved.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.chars().count(), MAX_ARTIFACT_NAME_CHARS);
        assert_eq!(saved.extension().unwrap(), "txt");
    }

    #[test]
    fn generated_names_are_distinct_and_reject_empty() {
        let root = temp_root("gen");
        let mut am = ArtifactManager::new(&root).unwrap();
        am.set_dest_path(Some("gen"), 1).unwrap();
        let a = am.generate_artifact_file_name("capture.png").unwrap();
        let b = am.generate_artifact_file_name("capture.png").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(am.dest_path()));
        assert!(matches!(am.generate_artifact_file_name(""), Err(LyError::Artifact(_))));
    }

    #[test]
    fn missing_source_is_an_artifact_error() {
        let root = temp_root("missing");
        let mut am = ArtifactManager::new(&root).unwrap();
        let err = am.save_artifact(&root.join("nope.log"), None).unwrap_err();
        assert!(matches!(err, LyError::Artifact(_)));
    }

    #[test]
    fn gather_zips_the_test_folder() {
        let root = temp_root("gather");
        let mut am = ArtifactManager::new(&root).unwrap();
        let dest = am.set_dest_path(Some("suite.Case.test_a"), 1).unwrap();
        std::fs::write(dest.join("ToolsInfo.log"), b"info").unwrap();
        let zip = am.gather_artifacts(&root.join("suite.Case.test_a-logs")).unwrap();
        assert_eq!(zip, root.join("suite.Case.test_a-logs.zip"));

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&zip).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.by_index(0).unwrap().name(), "ToolsInfo.log");
    }

    #[cfg(unix)]
    #[test]
    fn saved_files_are_owner_rwx() {
        use std::os::unix::fs::PermissionsExt;

        let root = temp_root("perm");
        let src_dir = temp_root("perm-src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let src = src_dir.join("ro.txt");
        std::fs::write(&src, b"x").unwrap();
        std::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o444)).unwrap();

        let mut am = ArtifactManager::new(&root).unwrap();
        let saved = am.save_artifact(&src, None).unwrap();
        let mode = std::fs::metadata(&saved).unwrap().permissions().mode();
        assert_eq!(mode & 0o700, 0o700);
    }
}
