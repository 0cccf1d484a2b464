use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::model::{BookingRecord, BookingState};

/// Durable storage for the full booking set, consumed as
/// "read whole set / write whole set".
///
/// Writes go through a backup-then-replace sequence: serialize to a temp
/// file, fsync, rotate the current primary to `.bak`, then rename the temp
/// over the primary. A crash mid-write therefore never leaves the primary
/// unreadable without an intact predecessor next to it, and `load_all`
/// recovers from `.bak` when the primary does not parse.
pub struct RecordStore {
    path: PathBuf,
    /// Serializes writes with any administrative writer sharing the file.
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(".bak");
        PathBuf::from(os)
    }

    /// Read the full set. Missing file means an empty set; a corrupt
    /// primary is recovered from the backup, and if both are unreadable an
    /// empty set is persisted so the next tick starts from known-good state.
    pub async fn load_all(&self) -> io::Result<Vec<BookingRecord>> {
        let _guard = self.lock.lock().await;
        match read_records(&self.path) {
            Ok(Some(records)) => Ok(records),
            Ok(None) => Ok(Vec::new()),
            Err(primary_err) => {
                warn!(
                    path = %self.path.display(),
                    "primary record file unreadable, trying backup: {primary_err}"
                );
                match read_records(&self.backup_path()) {
                    Ok(Some(records)) => Ok(records),
                    Ok(None) | Err(_) => {
                        error!(
                            path = %self.path.display(),
                            "backup unreadable too, starting from an empty set"
                        );
                        let empty: Vec<BookingRecord> = Vec::new();
                        self.write_locked(&empty)?;
                        Ok(empty)
                    }
                }
            }
        }
    }

    /// Persist the full set, purging records flagged `Delete` first.
    pub async fn save_all(&self, records: &[BookingRecord]) -> io::Result<()> {
        let _guard = self.lock.lock().await;
        let kept: Vec<&BookingRecord> = records
            .iter()
            .filter(|r| {
                if r.state == BookingState::Delete {
                    info!(
                        id = r.id,
                        resource = %r.resource,
                        user = %r.credentials.username,
                        at = %r.date,
                        "purging expired booking"
                    );
                    false
                } else {
                    true
                }
            })
            .collect();
        self.write_locked(&kept)
    }

    /// Backup-then-replace. Caller holds the store lock.
    fn write_locked<T: serde::Serialize>(&self, records: &T) -> io::Result<()> {
        let payload = serde_json::to_vec_pretty(records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&payload)?;
        tmp.sync_all()?;

        if self.path.exists() {
            fs::rename(&self.path, self.backup_path())?;
        }
        fs::rename(&tmp_path, &self.path)
    }
}

/// `Ok(None)` when the file does not exist; `Err` when it exists but cannot
/// be read or parsed.
fn read_records(path: &Path) -> io::Result<Option<Vec<BookingRecord>>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let records = serde_json::from_slice(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::test_record;

    fn test_store(name: &str) -> RecordStore {
        let dir = std::env::temp_dir().join("helmsman_test_store");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        let store = RecordStore::new(&path);
        let _ = fs::remove_file(store.backup_path());
        store
    }

    #[tokio::test]
    async fn missing_file_is_empty_set() {
        let store = test_store("missing.json");
        let records = store.load_all().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = test_store("roundtrip.json");
        let mut record = test_record();
        record.state = BookingState::Finished;
        record.external_id = "r99".into();
        store.save_all(std::slice::from_ref(&record)).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
        assert_eq!(loaded[0].state, BookingState::Finished);
        assert_eq!(loaded[0].external_id, "r99");
    }

    #[tokio::test]
    async fn corrupt_primary_recovers_from_backup() {
        let store = test_store("corrupt.json");
        let record = test_record();
        // Two saves so the backup holds a valid copy.
        store.save_all(std::slice::from_ref(&record)).await.unwrap();
        store.save_all(std::slice::from_ref(&record)).await.unwrap();

        fs::write(store.path(), b"{ not json").unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);

        // A subsequent save restores a valid primary.
        store.save_all(&loaded).await.unwrap();
        let reloaded = store.load_all().await.unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn both_copies_corrupt_yields_persisted_empty_set() {
        let store = test_store("both_corrupt.json");
        fs::write(store.path(), b"garbage").unwrap();
        fs::write(store.backup_path(), b"garbage").unwrap();

        let loaded = store.load_all().await.unwrap();
        assert!(loaded.is_empty());

        // The primary was rewritten as a valid empty set.
        let raw = fs::read_to_string(store.path()).unwrap();
        let parsed: Vec<BookingRecord> = serde_json::from_str(&raw).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn save_purges_deleted_records() {
        let store = test_store("purge.json");
        let keep = test_record();
        let mut gone = test_record();
        gone.id = 2;
        gone.state = BookingState::Delete;

        store.save_all(&[keep, gone]).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, 1);
    }
}
