//! Snapshot persistence for the in-memory row store

use super::{InMemoryRowStore, StoredTable};
use crate::core::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub metadata: SnapshotMetadata,
    pub tables: HashMap<String, StoredTable>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    pub table_count: usize,
}

impl StoreSnapshot {
    pub fn new(tables: HashMap<String, StoredTable>) -> Self {
        let row_count = tables.values().map(|t| t.row_count()).sum();
        let table_count = tables.len();

        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                row_count,
                table_count,
            },
            tables,
        }
    }
}

/// Reads and writes store snapshots at a fixed path.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash never leaves a half-written snapshot behind.
pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    pub fn save(&self, snapshot: &StoreSnapshot) -> StoreResult<()> {
        let parent = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| StoreError::Codec(format!("Failed to serialize snapshot: {}", e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            writer.write_all(&serialized)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| StoreError::Io(format!("Failed to move snapshot into place: {}", e)))?;

        info!(
            path = %self.snapshot_path.display(),
            rows = snapshot.metadata.row_count,
            tables = snapshot.metadata.table_count,
            "store snapshot written"
        );
        Ok(())
    }

    pub fn load(&self) -> StoreResult<StoreSnapshot> {
        let file = File::open(&self.snapshot_path)?;
        let reader = BufReader::new(file);
        let snapshot: StoreSnapshot = rmp_serde::from_read(reader)
            .map_err(|e| StoreError::Codec(format!("Failed to deserialize snapshot: {}", e)))?;

        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::Codec(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

impl InMemoryRowStore {
    /// Write every committed table to `path`. Open units of work are not included.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        let tables = self.state.read()?.tables.clone();
        SnapshotManager::new(path).save(&StoreSnapshot::new(tables))
    }

    /// Build a store from a snapshot written by [`save_snapshot`](Self::save_snapshot).
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let snapshot = SnapshotManager::new(path).load()?;
        Ok(Self::from_tables(snapshot.tables))
    }
}
