//! Durable element -> field -> record store backed by one pretty-printed JSON
//! file.
//!
//! Reads never fail: a missing or empty file is an empty document, and
//! unparsable content is quarantined into a `<name>.backup.<millis>` sibling
//! before an empty document is returned. Writes go through a temp file in the
//! same directory and are renamed into place, so a concurrent reader sees the
//! old file or the new one, never a prefix.

pub mod backup;
pub mod models;
pub mod validate;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use rand::Rng;
use serde::Serialize;

use crate::error::{Result, SyncError};

pub use models::{Document, ElementFields, ElementKey, FieldRecord};

pub const DEFAULT_BACKUP_KEEP: usize = 5;
pub const DEFAULT_CLEANUP_PROBABILITY: f64 = 0.1;

/// Outcome of [`RecordStore::validate_and_repair`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub repaired: bool,
    pub errors: Vec<String>,
    pub backup: Option<PathBuf>,
}

/// What a raw load produced, before any repair.
struct Loaded {
    document: Document,
    raw: Option<Vec<u8>>,
    defects: Vec<String>,
}

pub struct RecordStore {
    path: PathBuf,
    /// Serializes every read-modify-write against this file.
    write_lock: Mutex<()>,
    backup_keep: usize,
    cleanup_probability: f64,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            backup_keep: DEFAULT_BACKUP_KEEP,
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
        }
    }

    /// Backup rotation policy: keep `keep` backups, rotate after a write with
    /// probability `probability`.
    pub fn with_backup_policy(mut self, keep: usize, probability: f64) -> Self {
        self.backup_keep = keep;
        self.cleanup_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Document {
        match self.load() {
            Ok(loaded) => loaded.document,
            Err(err) => {
                warn!("{err}; treating store as empty");
                Document::new()
            }
        }
    }

    /// Persists `document` atomically.
    pub fn write(&self, document: &Document) -> Result<()> {
        let _guard = self.lock();
        self.write_unlocked(document)
    }

    /// Replaces one record, leaving every other record as it was.
    pub fn upsert(&self, element_id: &str, field_name: &str, record: FieldRecord) -> Result<()> {
        {
            let _guard = self.lock();
            // An unreadable file is never overwritten by a partial view of it.
            let mut loaded = self.load()?;

            // Records dropped by the lenient load would vanish on write-back;
            // keep the raw bytes around first.
            if !loaded.defects.is_empty() {
                if let Some(raw) = &loaded.raw {
                    backup::write_backup(&self.path, raw)?;
                }
            }

            loaded.document.upsert(element_id, field_name, record);
            self.write_unlocked(&loaded.document)?;
        }

        self.maybe_cleanup_backups();
        Ok(())
    }

    pub fn validate_and_repair(&self) -> ValidationReport {
        let _guard = self.lock();

        let raw = match self.read_raw() {
            Ok(Some(raw)) if !is_blank(&raw) => raw,
            Ok(_) => {
                return ValidationReport {
                    is_valid: true,
                    ..Default::default()
                }
            }
            Err(err) => {
                return ValidationReport {
                    errors: vec![err.to_string()],
                    ..Default::default()
                }
            }
        };

        let parsed = std::str::from_utf8(&raw)
            .map_err(|err| format!("content is not valid UTF-8: {err}"))
            .and_then(|text| {
                serde_json::from_str::<serde_json::Value>(text)
                    .map_err(|err| format!("JSON parse error: {err}"))
            })
            .and_then(|value| validate::clean(&value));

        match parsed {
            Ok(cleaned) if !cleaned.has_defects() => ValidationReport {
                is_valid: true,
                ..Default::default()
            },
            Ok(cleaned) => {
                let report = ValidationReport {
                    errors: cleaned.errors,
                    ..Default::default()
                };
                self.repair_with(&raw, &cleaned.document, report)
            }
            Err(reason) => {
                let err = SyncError::corruption(&self.path, reason);
                warn!("{err}; resetting to an empty document");
                let report = ValidationReport {
                    errors: vec![err.to_string()],
                    ..Default::default()
                };
                self.repair_with(&raw, &Document::new(), report)
            }
        }
    }

    pub fn cleanup_backups(&self, keep: usize) -> Result<usize> {
        backup::cleanup_backups(&self.path, keep)
    }

    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        Ok(backup::list_backups(&self.path)?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    /// Backs up `raw`, then writes `replacement`. Without a backup nothing is
    /// overwritten.
    fn repair_with(
        &self,
        raw: &[u8],
        replacement: &Document,
        mut report: ValidationReport,
    ) -> ValidationReport {
        let backup = match backup::write_backup(&self.path, raw) {
            Ok(path) => path,
            Err(err) => {
                report.errors.push(format!("repair skipped, backup failed: {err}"));
                return report;
            }
        };
        report.backup = Some(backup.clone());

        match self.write_unlocked(replacement) {
            Ok(()) => {
                report.repaired = true;
                info!(
                    "repaired {} ({} issue(s)), previous content kept at {}",
                    self.path.display(),
                    report.errors.len(),
                    backup.display()
                );
            }
            Err(err) => report.errors.push(format!("repair write failed: {err}")),
        }
        report
    }

    fn load(&self) -> Result<Loaded> {
        let raw = match self.read_raw()? {
            Some(raw) => raw,
            None => return Ok(Loaded::empty(None)),
        };

        if is_blank(&raw) {
            return Ok(Loaded::empty(Some(raw)));
        }

        let parsed = std::str::from_utf8(&raw)
            .map_err(|err| format!("content is not valid UTF-8: {err}"))
            .and_then(|text| {
                serde_json::from_str::<serde_json::Value>(text)
                    .map_err(|err| err.to_string())
                    .and_then(|value| validate::clean(&value))
            });

        match parsed {
            Ok(cleaned) => {
                if cleaned.has_defects() {
                    warn!(
                        "{} has {} invalid record(s); they are ignored until the store is repaired",
                        self.path.display(),
                        cleaned.errors.len()
                    );
                }
                Ok(Loaded {
                    document: cleaned.document,
                    raw: Some(raw),
                    defects: cleaned.errors,
                })
            }
            Err(reason) => {
                let err = SyncError::corruption(&self.path, reason);
                // Without a copy on disk the caller must not build on an empty view.
                let backup = backup::write_backup(&self.path, &raw)?;
                warn!("{err}; content copied to {}", backup.display());
                Ok(Loaded::empty(None))
            }
        }
    }

    fn read_raw(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SyncError::store_io(&self.path, err)),
        }
    }

    fn write_unlocked(&self, document: &Document) -> Result<()> {
        let serialized = serde_json::to_string_pretty(document)
            .map_err(|err| SyncError::store_io(&self.path, err))?;
        atomic_write(&self.path, serialized.as_bytes())
    }

    fn maybe_cleanup_backups(&self) {
        if self.cleanup_probability <= 0.0 {
            return;
        }
        if !rand::thread_rng().gen_bool(self.cleanup_probability) {
            return;
        }
        if let Err(err) = self.cleanup_backups(self.backup_keep) {
            warn!("backup cleanup failed: {err}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Loaded {
    fn empty(raw: Option<Vec<u8>>) -> Self {
        Self {
            document: Document::new(),
            raw,
            defects: Vec::new(),
        }
    }
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|err| SyncError::store_io(dir, err))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|err| SyncError::store_io(dir, err))?;
    temp.write_all(data)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| SyncError::store_io(temp.path(), err))?;
    temp.persist(path)
        .map_err(|err| SyncError::store_io(path, err.error))?;
    Ok(())
}
