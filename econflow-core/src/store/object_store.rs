//! Object store seam and the local filesystem implementation.
//!
//! Layout under the root:
//! - `{layer}/source={s}/indicator={c}/year={yyyy}/month={mm}/part.parquet`
//! - `_rejected/{same partition path}/part.jsonl`
//!
//! Replacement is atomic: bytes go to a uniquely named staging file in the
//! partition directory which is then renamed over `part.parquet`. Readers
//! only ever open `part.parquet`, so staged bytes are never observed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Layer, PartitionKey, SourceId, TimeRange};

pub const PARTITION_FILE: &str = "part.parquet";
pub const REJECTED_FILE: &str = "part.jsonl";
pub const REJECTED_DIR: &str = "_rejected";

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Partitioned blob storage the lake writes through.
pub trait ObjectStore: Send + Sync {
    /// Replace the partition atomically.
    fn put_partition(&self, key: &PartitionKey, payload: &[u8]) -> Result<(), StoreError>;

    fn get_partition(&self, key: &PartitionKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Existing partitions of one series whose month falls in `range`, ascending.
    fn list_partitions(
        &self,
        layer: Layer,
        source: SourceId,
        indicator_code: &str,
        range: &TimeRange,
    ) -> Result<Vec<PartitionKey>, StoreError>;

    /// Every stored partition of one series, ascending.
    fn list_series(
        &self,
        layer: Layer,
        source: SourceId,
        indicator_code: &str,
    ) -> Result<Vec<PartitionKey>, StoreError>;

    /// Remove the partition. Returns whether there was one.
    fn remove_partition(&self, key: &PartitionKey) -> Result<bool, StoreError>;

    /// Replace the rejected-records file of a partition.
    fn put_rejected(&self, key: &PartitionKey, payload: &[u8]) -> Result<(), StoreError>;

    /// Drop the rejected-records file of a partition, if any.
    fn remove_rejected(&self, key: &PartitionKey) -> Result<(), StoreError>;

    /// Move an unreadable partition aside so later reads skip it.
    fn quarantine_partition(&self, key: &PartitionKey) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.relative_dir()).join(PARTITION_FILE)
    }

    pub fn rejected_path(&self, key: &PartitionKey) -> PathBuf {
        self.root
            .join(REJECTED_DIR)
            .join(key.relative_dir())
            .join(REJECTED_FILE)
    }

    fn write_atomic(&self, path: &Path, payload: &[u8]) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Unavailable(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let stage = dir.join(format!(
            ".{}.{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("part"),
            std::process::id(),
            STAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = fs::File::create(&stage).and_then(|mut f| {
            f.write_all(payload)?;
            f.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&stage);
            return Err(StoreError::io(&stage, e));
        }

        fs::rename(&stage, path).map_err(|e| {
            let _ = fs::remove_file(&stage);
            StoreError::io(path, e)
        })?;
        debug!(path = %path.display(), bytes = payload.len(), "promoted");
        Ok(())
    }

    /// Unlink `path`; readers see either the old file or none.
    fn remove(&self, path: &Path) -> Result<bool, StoreError> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

/// Parse `{prefix}={number}` directory names.
fn dir_number<T: std::str::FromStr>(entry: &fs::DirEntry, prefix: &str) -> Option<T> {
    let name = entry.file_name();
    let name = name.to_str()?;
    name.strip_prefix(prefix)?.strip_prefix('=')?.parse().ok()
}

fn sub_dirs(dir: &Path) -> Result<Vec<fs::DirEntry>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        if entry.path().is_dir() {
            out.push(entry);
        }
    }
    Ok(out)
}

impl ObjectStore for LocalObjectStore {
    fn put_partition(&self, key: &PartitionKey, payload: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(&self.partition_path(key), payload)
    }

    fn get_partition(&self, key: &PartitionKey) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.partition_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn list_partitions(
        &self,
        layer: Layer,
        source: SourceId,
        indicator_code: &str,
        range: &TimeRange,
    ) -> Result<Vec<PartitionKey>, StoreError> {
        Ok(range
            .months()
            .into_iter()
            .map(|(year, month)| PartitionKey::new(layer, source, indicator_code, year, month))
            .filter(|key| self.partition_path(key).is_file())
            .collect())
    }

    fn list_series(
        &self,
        layer: Layer,
        source: SourceId,
        indicator_code: &str,
    ) -> Result<Vec<PartitionKey>, StoreError> {
        let series_dir = self
            .root
            .join(layer.as_str())
            .join(format!("source={source}"))
            .join(format!("indicator={indicator_code}"));
        let mut keys = Vec::new();
        for year_dir in sub_dirs(&series_dir)? {
            let Some(year) = dir_number::<i32>(&year_dir, "year") else {
                continue;
            };
            for month_dir in sub_dirs(&year_dir.path())? {
                let Some(month) = dir_number::<u32>(&month_dir, "month") else {
                    continue;
                };
                let key = PartitionKey::new(layer, source, indicator_code, year, month);
                if self.partition_path(&key).is_file() {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn remove_partition(&self, key: &PartitionKey) -> Result<bool, StoreError> {
        self.remove(&self.partition_path(key))
    }

    fn put_rejected(&self, key: &PartitionKey, payload: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(&self.rejected_path(key), payload)
    }

    fn remove_rejected(&self, key: &PartitionKey) -> Result<(), StoreError> {
        self.remove(&self.rejected_path(key)).map(|_| ())
    }

    fn quarantine_partition(&self, key: &PartitionKey) -> Result<(), StoreError> {
        let path = self.partition_path(key);
        let target = path.with_extension("parquet.quarantined");
        fs::rename(&path, &target).map_err(|e| StoreError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key(month: u32) -> PartitionKey {
        PartitionKey::new(Layer::Raw, SourceId::Bcb, "ipca", 2024, month)
    }

    #[test]
    fn put_get_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert_eq!(store.get_partition(&key(1)).unwrap(), None);

        store.put_partition(&key(1), b"first").unwrap();
        store.put_partition(&key(1), b"second").unwrap();
        assert_eq!(store.get_partition(&key(1)).unwrap().unwrap(), b"second");
        assert!(dir
            .path()
            .join("raw/source=bcb/indicator=ipca/year=2024/month=01/part.parquet")
            .is_file());
    }

    #[test]
    fn no_staging_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put_partition(&key(2), b"x").unwrap();
        let partition_dir = store.partition_path(&key(2)).parent().unwrap().to_path_buf();
        let names: Vec<_> = fs::read_dir(partition_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![PARTITION_FILE.to_string()]);
    }

    #[test]
    fn list_restricted_to_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        for m in [1, 2, 5] {
            store.put_partition(&key(m), b"x").unwrap();
        }
        let range = TimeRange::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
        .unwrap();
        let keys = store
            .list_partitions(Layer::Raw, SourceId::Bcb, "ipca", &range)
            .unwrap();
        assert_eq!(keys, vec![key(2), key(5)]);
    }

    #[test]
    fn series_listing_spans_years() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let dec = PartitionKey::new(Layer::Raw, SourceId::Bcb, "ipca", 2023, 12);
        store.put_partition(&key(3), b"x").unwrap();
        store.put_partition(&dec, b"x").unwrap();
        store.put_partition(&key(1), b"x").unwrap();
        // quarantined and foreign series are not listed
        store.put_partition(&key(2), b"x").unwrap();
        store.quarantine_partition(&key(2)).unwrap();
        store
            .put_partition(&PartitionKey::new(Layer::Raw, SourceId::Bcb, "selic", 2024, 1), b"x")
            .unwrap();

        let keys = store.list_series(Layer::Raw, SourceId::Bcb, "ipca").unwrap();
        assert_eq!(keys, vec![dec, key(1), key(3)]);
        assert!(store
            .list_series(Layer::Aggregated, SourceId::Bcb, "ipca")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put_partition(&key(6), b"x").unwrap();
        store.put_rejected(&key(6), b"{}\n").unwrap();
        assert!(store.remove_partition(&key(6)).unwrap());
        assert!(!store.remove_partition(&key(6)).unwrap());
        store.remove_rejected(&key(6)).unwrap();
        store.remove_rejected(&key(6)).unwrap();
        assert!(!store.rejected_path(&key(6)).exists());
        assert_eq!(store.get_partition(&key(6)).unwrap(), None);
    }

    #[test]
    fn rejected_area_is_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put_rejected(&key(3), b"{}\n").unwrap();
        assert!(store.rejected_path(&key(3)).is_file());
        assert_eq!(store.get_partition(&key(3)).unwrap(), None);
    }

    #[test]
    fn quarantine_hides_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put_partition(&key(4), b"garbage").unwrap();
        store.quarantine_partition(&key(4)).unwrap();
        assert_eq!(store.get_partition(&key(4)).unwrap(), None);
    }
}
