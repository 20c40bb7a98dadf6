//! Small filesystem utilities.

use globset::{Glob, GlobSet, GlobSetBuilder};

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{LyError, LyResult};

/// Files under `root` whose root-relative path matches any of `patterns`.
pub fn find_matching_files(root: &Path, patterns: &[String]) -> LyResult<Vec<PathBuf>> {
    let set = compile_globset(patterns)?;
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(walkdir_to_io)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.path();
        let rel = p.strip_prefix(root).unwrap_or(p);
        let name_match = rel.file_name().is_some_and(|n| set.is_match(n));
        if set.is_match(rel) || name_match {
            out.push(p.to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

fn compile_globset(patterns: &[String]) -> LyResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p).map_err(|e| LyError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| LyError::InvalidArgument(format!("invalid globset: {e}")))
}

fn walkdir_to_io(e: walkdir::Error) -> LyError {
    let msg = e.to_string();
    LyError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other(msg)))
}

/// Give the owner read/write/execute on `path` (no-op off unix).
pub fn set_owner_permissions(path: &Path) -> LyResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = std::fs::metadata(path)?.permissions().mode();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o700))?;
    }
    #[cfg(not(unix))]
    {
        let mut perms = std::fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Copy a file, replacing any existing target, and open up its permissions.
pub fn copy_file_overwrite(src: &Path, dst: &Path) -> LyResult<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if dst.exists() {
        set_owner_permissions(dst)?;
    }
    std::fs::copy(src, dst)?;
    set_owner_permissions(dst)?;
    Ok(())
}

/// Recursively copy `src` into `dst`, merging with whatever `dst` already holds.
pub fn copy_tree_overwrite(src: &Path, dst: &Path) -> LyResult<u64> {
    let mut copied = 0u64;
    std::fs::create_dir_all(dst)?;
    set_owner_permissions(dst)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry.map_err(walkdir_to_io)?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
            set_owner_permissions(&target)?;
        } else if entry.file_type().is_file() {
            copy_file_overwrite(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Zip every file below `dir` into `out_zip`, using `/`-separated relative entry names.
pub fn zip_directory(dir: &Path, out_zip: &Path) -> LyResult<usize> {
    if let Some(parent) = out_zip.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(walkdir_to_io)?;
        if entry.file_type().is_file() && entry.path() != out_zip {
            files.push(entry.into_path());
        }
    }

    let file = File::create(out_zip)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for path in &files {
        let rel = path.strip_prefix(dir).unwrap_or(path);
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        let bytes = std::fs::read(path)?;
        zip.write_all(&bytes)?;
    }

    zip.finish()?;
    Ok(files.len())
}

/// Cut the stem of `name` to `max_chars` characters, keeping any extension.
pub fn truncate_file_name(name: &str, max_chars: usize) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|s| s.to_str());
    if stem.chars().count() <= max_chars {
        return name.to_string();
    }
    let cut: String = stem.chars().take(max_chars).collect();
    match ext {
        Some(ext) => format!("{cut}.{ext}"),
        None => cut,
    }
}
