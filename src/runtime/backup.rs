//! Backup and restore of files a launcher mutates during a test.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{LyError, LyResult, copy_file_overwrite};

#[derive(Debug, Clone)]
struct BackupEntry {
    /// Saved copy, or `None` when the file did not exist at backup time.
    copy: Option<PathBuf>,
    checksum: Option<String>,
}

/// Holds pristine copies of settings files until [`SettingsBackup::restore_all`].
///
/// Backing a file up twice keeps the first copy, so the file is always restored to its
/// state before the test touched it.
#[derive(Debug)]
pub struct SettingsBackup {
    backup_dir: PathBuf,
    entries: BTreeMap<PathBuf, BackupEntry>,
}

impl SettingsBackup {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn backed_up(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn create_backup(&mut self, file: &Path) -> LyResult<()> {
        if self.entries.contains_key(file) {
            return Ok(());
        }
        let entry = if file.is_file() {
            let bytes = std::fs::read(file)?;
            let checksum = blake3::hash(&bytes).to_hex().to_string();
            let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("settings");
            let copy = self.backup_dir.join(format!("{}-{name}.bak", &checksum[..16]));
            copy_file_overwrite(file, &copy)?;
            tracing::debug!("backed up {} to {}", file.display(), copy.display());
            BackupEntry {
                copy: Some(copy),
                checksum: Some(checksum),
            }
        } else {
            tracing::debug!("{} does not exist yet, it will be removed on restore", file.display());
            BackupEntry {
                copy: None,
                checksum: None,
            }
        };
        self.entries.insert(file.to_path_buf(), entry);
        Ok(())
    }

    pub fn restore_backup(&mut self, file: &Path) -> LyResult<()> {
        let Some(entry) = self.entries.remove(file) else {
            return Ok(());
        };
        match (entry.copy, entry.checksum) {
            (Some(copy), Some(checksum)) => {
                let bytes = std::fs::read(&copy)?;
                let got = blake3::hash(&bytes).to_hex().to_string();
                if got != checksum {
                    return Err(LyError::Setup(format!(
                        "backup {} of {} is corrupt (checksum {got}, expected {checksum})",
                        copy.display(),
                        file.display()
                    )));
                }
                copy_file_overwrite(&copy, file)?;
                std::fs::remove_file(&copy)?;
                tracing::debug!("restored {}", file.display());
            }
            _ => {
                if file.exists() {
                    std::fs::remove_file(file)?;
                    tracing::debug!("removed {} created during the test", file.display());
                }
            }
        }
        Ok(())
    }

    /// Restore every backed-up file. Keeps going past failures and returns the first one.
    pub fn restore_all(&mut self) -> LyResult<()> {
        let files: Vec<PathBuf> = self.entries.keys().cloned().collect();
        let mut first_err = None;
        for file in files {
            if let Err(e) = self.restore_backup(&file) {
                tracing::warn!("failed to restore {}: {e}", file.display());
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
