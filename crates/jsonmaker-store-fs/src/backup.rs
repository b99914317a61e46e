use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use jsonmaker_core::{
    backup_filename, display_timestamp, epoch_seconds, BackupLedger, BackupRecord,
    PersistenceError, BACKUP_RETENTION, LEDGER_FILE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::{read_json, write_json_atomic};

/// `backup_metadata.json` inside the backups directory.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    #[must_use]
    pub fn new(backups_dir: &Path) -> Self {
        Self { path: backups_dir.join(LEDGER_FILE) }
    }

    /// Load the ledger, falling back to an empty one when it is missing or unreadable.
    #[must_use]
    pub fn load(&self) -> BackupLedger {
        if !self.path.exists() {
            return BackupLedger::default();
        }
        match read_json::<BackupLedger>(&self.path) {
            Ok(ledger) => ledger,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %format!("{err:#}"), "backup ledger unreadable; starting fresh");
                BackupLedger::default()
            }
        }
    }

    /// # Errors
    /// Returns an error when the backups directory cannot be created or the ledger written.
    pub fn save(&self, ledger: &BackupLedger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create backups directory {}", parent.display())
            })?;
        }
        write_json_atomic(&self.path, ledger)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupOutcome {
    pub filename: String,
    pub timestamp: String,
    pub backups_count: usize,
}

/// Snapshots the topic store directory into rotating zip archives.
///
/// Clones share one lock, so the cooldown check and the ledger update of concurrent
/// attempts never interleave.
#[derive(Debug, Clone)]
pub struct BackupEngine {
    source_dir: PathBuf,
    backups_dir: PathBuf,
    ledger: LedgerFile,
    lock: Arc<Mutex<()>>,
}

impl BackupEngine {
    #[must_use]
    pub fn new(source_dir: impl Into<PathBuf>, backups_dir: impl Into<PathBuf>) -> Self {
        let backups_dir = backups_dir.into();
        Self {
            source_dir: source_dir.into(),
            ledger: LedgerFile::new(&backups_dir),
            backups_dir,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// # Errors
    /// See [`BackupEngine::create_backup_at`].
    pub fn create_backup(&self) -> Result<BackupOutcome> {
        self.create_backup_at(OffsetDateTime::now_utc())
    }

    /// Run one backup attempt as of `now`.
    ///
    /// # Errors
    /// - [`PersistenceError::RateLimited`] when the previous backup is less than 60 seconds old.
    /// - [`PersistenceError::NotFound`] when the topic store directory does not exist.
    /// - [`PersistenceError::Internal`] when the archive cannot be written; the partial archive
    ///   is removed and the ledger is left as it was.
    /// - [`PersistenceError::Internal`] when the ledger cannot be persisted; the new archive is
    ///   removed and no expired archive is deleted.
    pub fn create_backup_at(&self, now: OffsetDateTime) -> Result<BackupOutcome> {
        let _guard = self.lock.lock();

        let mut ledger = self.ledger.load();
        let now_seconds = epoch_seconds(now);
        if let Some(remaining_seconds) = ledger.cooldown_remaining(now_seconds) {
            return Err(PersistenceError::RateLimited { remaining_seconds }.into());
        }

        if !self.source_dir.is_dir() {
            return Err(PersistenceError::NotFound(format!(
                "no data directory to back up at {}",
                self.source_dir.display()
            ))
            .into());
        }

        let filename = backup_filename(now)?;
        let timestamp_str = display_timestamp(now)?;
        let archive_path = self.backups_dir.join(&filename);

        let size = match self.write_archive(&archive_path) {
            Ok(size) => size,
            Err(err) => {
                discard_archive(&archive_path);
                tracing::error!(error = %format!("{err:#}"), "backup archive creation failed");
                return Err(PersistenceError::Internal(format!(
                    "failed to create backup archive: {err:#}"
                ))
                .into());
            }
        };

        ledger.record(BackupRecord {
            filename: filename.clone(),
            timestamp: now_seconds,
            timestamp_str: timestamp_str.clone(),
            size,
        });

        let expired = ledger.prune(BACKUP_RETENTION);

        // The archive only counts once the ledger records it; expired archives go after that.
        if let Err(err) = self.ledger.save(&ledger) {
            discard_archive(&archive_path);
            tracing::error!(error = %format!("{err:#}"), "backup ledger update failed");
            return Err(PersistenceError::Internal(format!(
                "failed to record backup in ledger: {err:#}"
            ))
            .into());
        }

        for record in expired {
            let path = self.backups_dir.join(&record.filename);
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!(filename = %record.filename, "removed expired backup"),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove expired backup");
                }
            }
        }

        tracing::info!(filename = %filename, size, retained = ledger.backups.len(), "backup created");
        Ok(BackupOutcome { filename, timestamp: timestamp_str, backups_count: ledger.backups.len() })
    }

    /// Current ledger contents, newest first.
    #[must_use]
    pub fn list(&self) -> BackupLedger {
        let mut ledger = self.ledger.load();
        ledger.backups.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        ledger
    }

    fn write_archive(&self, archive_path: &Path) -> Result<u64> {
        fs::create_dir_all(&self.backups_dir).with_context(|| {
            format!("failed to create backups directory {}", self.backups_dir.display())
        })?;

        let temp = NamedTempFile::new_in(&self.backups_dir).with_context(|| {
            format!("failed to create temp archive in {}", self.backups_dir.display())
        })?;
        let mut zip = ZipWriter::new(temp);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let walker = WalkDir::new(&self.source_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !entry.path().starts_with(&self.backups_dir));
        for entry in walker {
            let entry = entry.with_context(|| {
                format!("failed to walk data directory {}", self.source_dir.display())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = archive_entry_name(&self.source_dir, entry.path())?;
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("failed to start archive entry {name}"))?;
            let mut source = File::open(entry.path())
                .with_context(|| format!("failed to open {}", entry.path().display()))?;
            io::copy(&mut source, &mut zip)
                .with_context(|| format!("failed to archive {}", entry.path().display()))?;
        }

        let temp = zip.finish().context("failed to finalize backup archive")?;
        temp.as_file().sync_all().context("failed to sync backup archive")?;
        let file = temp
            .persist(archive_path)
            .with_context(|| format!("failed to move backup archive to {}", archive_path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("failed to stat {}", archive_path.display()))?
            .len();
        Ok(size)
    }
}

fn discard_archive(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(err) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove backup archive");
    }
}

fn archive_entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
