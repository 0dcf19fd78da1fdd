//! File-ownership registry: composite key -> owner, persisted as JSON
//!
//! The map is the authoritative record of which client owns each stored
//! file. One mutex guards all access; it is held only for the duration of
//! the map operation, never across filesystem I/O. Persistence rewrites the
//! whole snapshot after every mutation, so a crash loses at most the
//! in-flight operation.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::protocol::{composite_key, FileEntry};

pub struct FileRegistry {
    entries: Mutex<HashMap<String, String>>,
    metadata_path: PathBuf,
    // Serializes concurrent persist() calls, which share one temp file.
    // Separate from the entries lock so map access never waits on disk I/O.
    persist_lock: Mutex<()>,
}

impl FileRegistry {
    /// Load the registry from `metadata_path`, or start empty if the file
    /// does not exist. A present-but-corrupt metadata file is an error, not
    /// something to silently tolerate.
    pub fn open<P: AsRef<Path>>(metadata_path: P) -> Result<Self> {
        let metadata_path = metadata_path.as_ref().to_path_buf();
        let entries = if metadata_path.exists() {
            let raw = fs::read_to_string(&metadata_path).with_context(|| {
                format!("read metadata file {}", metadata_path.display())
            })?;
            serde_json::from_str(&raw).with_context(|| {
                format!("corrupt metadata file {}", metadata_path.display())
            })?
        } else {
            HashMap::new()
        };
        Ok(FileRegistry {
            entries: Mutex::new(entries),
            metadata_path,
            persist_lock: Mutex::new(()),
        })
    }

    /// Record ownership of `owner`'s `filename`. The caller must already
    /// have written the file to disk. Returns the composite key.
    pub fn insert(&self, owner: &str, filename: &str) -> String {
        let key = composite_key(owner, filename);
        self.entries.lock().insert(key.clone(), owner.to_string());
        key
    }

    /// Drop the entry for `owner`'s `filename`. The caller unlinks the
    /// on-disk file as part of the same logical operation.
    pub fn remove(&self, owner: &str, filename: &str) -> bool {
        let key = composite_key(owner, filename);
        self.entries.lock().remove(&key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Immutable copy of all entries, so a slow consumer never blocks
    /// mutators beyond the copy itself.
    pub fn snapshot(&self) -> Vec<FileEntry> {
        self.entries
            .lock()
            .iter()
            .map(|(filename, owner)| FileEntry {
                filename: filename.clone(),
                owner: owner.clone(),
            })
            .collect()
    }

    /// Write the full map to the metadata file. Runs after every successful
    /// insert/remove; a failure here is the caller's to log, and does not
    /// roll back the in-memory mutation. Temp-file + rename keeps the
    /// previous snapshot intact if the write dies halfway.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        // Entries lock only for the clone; disk I/O happens outside it.
        let copy = self.entries.lock().clone();
        let json = serde_json::to_string_pretty(&copy)?;
        let tmp = self.metadata_path.with_extension("tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("write metadata temp file {}", tmp.display()))?;
        fs::rename(&tmp, &self.metadata_path).with_context(|| {
            format!("replace metadata file {}", self.metadata_path.display())
        })?;
        Ok(())
    }

    /// Startup consistency check: a registry entry implies the file exists
    /// and vice versa. Returns a human-readable report of violations; the
    /// caller decides what to do with them (detect, do not auto-repair).
    pub fn verify_against(&self, files_dir: &Path) -> Result<Vec<String>> {
        let mut report = Vec::new();
        let keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        for key in &keys {
            if !files_dir.join(key).is_file() {
                report.push(format!("registry entry without on-disk file: {}", key));
            }
        }
        for entry in fs::read_dir(files_dir)
            .with_context(|| format!("scan files directory {}", files_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.contains(&name) {
                report.push(format!("on-disk file without registry entry: {}", name));
            }
        }
        Ok(report)
    }
}
