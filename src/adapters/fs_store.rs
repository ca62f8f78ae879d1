//! Filesystem persistence: the whole-tree configuration file and the
//! numbered snapshot directory.
//!
//! Writes go through a temp-file-and-rename so a power loss mid-write
//! never leaves a torn JSON document behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::app::ports::{BackupStore, ConfigPersistence};
use crate::config::model::DeviceConfig;
use crate::error::PersistError;

const SNAPSHOT_PREFIX: &str = "snapshot-";

fn io_err(e: std::io::Error) -> PersistError {
    PersistError::Io(e.to_string())
}

fn serde_err(e: serde_json::Error) -> PersistError {
    PersistError::Serde(e.to_string())
}

/// Serialise to a sibling temp file, then rename into place.
fn write_atomic(path: &Path, contents: &str) -> Result<(), PersistError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

// ───────────────────────────────────────────────────────────────
// Configuration file
// ───────────────────────────────────────────────────────────────

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigPersistence for FileConfigStore {
    fn load(&self) -> Result<Option<DeviceConfig>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(io_err)?;
        serde_json::from_str(&contents).map(Some).map_err(serde_err)
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), PersistError> {
        let contents = serde_json::to_string_pretty(config).map_err(serde_err)?;
        write_atomic(&self.path, &contents)
    }
}

// ───────────────────────────────────────────────────────────────
// Snapshot directory
// ───────────────────────────────────────────────────────────────

/// One JSON file per snapshot, numbered so enumeration preserves write
/// order across restarts.
pub struct FileBackupStore {
    dir: PathBuf,
    next_seq: AtomicU64,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err)?;
        let next_seq = Self::scan_max_seq(&dir)?.map_or(0, |max| max + 1);
        Ok(Self {
            dir,
            next_seq: AtomicU64::new(next_seq),
        })
    }

    fn scan_max_seq(dir: &Path) -> Result<Option<u64>, PersistError> {
        let mut max = None;
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if let Some(seq) = parse_seq(&entry.file_name().to_string_lossy()) {
                max = Some(max.map_or(seq, |m: u64| m.max(seq)));
            }
        }
        Ok(max)
    }

    fn snapshot_paths(&self) -> Result<Vec<(u64, PathBuf)>, PersistError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if let Some(seq) = parse_seq(&entry.file_name().to_string_lossy()) {
                paths.push((seq, entry.path()));
            }
        }
        paths.sort_by_key(|(seq, _)| *seq);
        Ok(paths)
    }
}

fn parse_seq(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl BackupStore for FileBackupStore {
    fn write_snapshot(&self, snapshot: &Value) -> Result<(), PersistError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{SNAPSHOT_PREFIX}{seq:06}.json"));
        let contents = serde_json::to_string(snapshot).map_err(serde_err)?;
        write_atomic(&path, &contents)
    }

    fn list_snapshots(&self) -> Result<Vec<Value>, PersistError> {
        let mut snapshots = Vec::new();
        for (_, path) in self.snapshot_paths()? {
            let contents = fs::read_to_string(&path).map_err(io_err)?;
            snapshots.push(serde_json::from_str(&contents).map_err(serde_err)?);
        }
        Ok(snapshots)
    }

    fn delete_all_snapshots(&self) -> Result<(), PersistError> {
        for (_, path) in self.snapshot_paths()? {
            fs::remove_file(&path).map_err(io_err)?;
        }
        Ok(())
    }
}
