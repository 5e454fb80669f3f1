use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};

use super::migrations::run_migrations;
use crate::error::StorageError;
use crate::models::PendingIdentification;

/// Local record store for pending identifications, keyed by record id.
///
/// The write path is write-then-acknowledge: when `insert` returns, the
/// record is durable. Implementations must keep `list_unsynced` ordered
/// oldest-first by `created_at`.
pub trait DurableStore: Send + Sync {
    fn insert(&self, record: &PendingIdentification) -> Result<(), StorageError>;
    fn get(&self, id: &str) -> Result<Option<PendingIdentification>, StorageError>;
    fn list_unsynced(&self) -> Result<Vec<PendingIdentification>, StorageError>;
    /// Full local history, newest first, synced records included.
    fn list_all(&self) -> Result<Vec<PendingIdentification>, StorageError>;
    fn record_attempt(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
    fn mark_synced(&self, id: &str, summary: &str) -> Result<(), StorageError>;
    fn unsynced_count(&self) -> Result<u32, StorageError>;
}

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct SqliteStoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SqliteStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Read(format!("invalid datetime '{value}': {err}")))
}

fn row_to_record(row: &Row) -> Result<PendingIdentification, StorageError> {
    let read = |err: rusqlite::Error| StorageError::Read(err.to_string());
    let created_at: String = row.get("created_at").map_err(read)?;
    let last_attempt_at: Option<String> = row.get("last_attempt_at").map_err(read)?;
    let attempts: i64 = row.get("attempts").map_err(read)?;

    Ok(PendingIdentification {
        id: row.get("id").map_err(read)?,
        user_id: row.get("user_id").map_err(read)?,
        image_jpeg: row.get("image_jpeg").map_err(read)?,
        created_at: parse_datetime(&created_at)?,
        synced: row.get("synced").map_err(read)?,
        result_summary: row.get("result_summary").map_err(read)?,
        counts_against_quota: row.get("counts_against_quota").map_err(read)?,
        attempts: attempts.max(0) as u32,
        last_attempt_at: last_attempt_at.as_deref().map(parse_datetime).transpose()?,
    })
}

const SELECT_COLUMNS: &str = "id, user_id, image_jpeg, created_at, synced, result_summary, \
     counts_against_quota, attempts, last_attempt_at";

/// SQLite-backed durable store. A dedicated worker thread owns the
/// connection; callers hand it closures and block on the reply, which
/// serializes enqueue and drain access to the same file.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<SqliteStoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                StorageError::Open(format!(
                    "failed to create store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("floralens-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx
                            .send(Err(StorageError::Open(format!("failed to open SQLite: {err}"))));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = run_migrations(&mut conn)
                    .map_err(|err| StorageError::Open(format!("migrations failed: {err:#}")));
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Record store thread shutting down");
            })
            .map_err(|err| StorageError::Open(format!("failed to spawn store thread: {err}")))?;

        ready_rx.recv().map_err(|_| StorageError::WorkerGone)??;

        info!("Record store opened at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(SqliteStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    fn execute<F, T>(&self, task: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| StorageError::WorkerGone)?;

        reply_rx.recv().map_err(|_| StorageError::WorkerGone)?
    }
}

impl DurableStore for SqliteStore {
    fn insert(&self, record: &PendingIdentification) -> Result<(), StorageError> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pending_identifications \
                 (id, user_id, image_jpeg, created_at, synced, result_summary, \
                  counts_against_quota, attempts, last_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.user_id,
                    record.image_jpeg,
                    record.created_at.to_rfc3339(),
                    record.synced,
                    record.result_summary,
                    record.counts_against_quota,
                    record.attempts as i64,
                    record.last_attempt_at.map(|dt| dt.to_rfc3339()),
                ],
            )
            .map_err(|err| StorageError::Write(format!("failed to insert record: {err}")))?;
            Ok(())
        })
    }

    fn get(&self, id: &str) -> Result<Option<PendingIdentification>, StorageError> {
        let id = id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM pending_identifications WHERE id = ?1"
                ))
                .map_err(|err| StorageError::Read(err.to_string()))?;

            let mut rows = stmt
                .query(params![id])
                .map_err(|err| StorageError::Read(err.to_string()))?;
            match rows.next().map_err(|err| StorageError::Read(err.to_string()))? {
                Some(row) => Ok(Some(row_to_record(row)?)),
                None => Ok(None),
            }
        })
    }

    fn list_unsynced(&self) -> Result<Vec<PendingIdentification>, StorageError> {
        self.execute(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM pending_identifications
                     WHERE synced = 0
                     ORDER BY created_at ASC, id ASC"
                ))
                .map_err(|err| StorageError::Read(err.to_string()))?;

            let mut rows = stmt
                .query([])
                .map_err(|err| StorageError::Read(err.to_string()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next().map_err(|err| StorageError::Read(err.to_string()))? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
    }

    fn list_all(&self) -> Result<Vec<PendingIdentification>, StorageError> {
        self.execute(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM pending_identifications
                     ORDER BY created_at DESC"
                ))
                .map_err(|err| StorageError::Read(err.to_string()))?;

            let mut rows = stmt
                .query([])
                .map_err(|err| StorageError::Read(err.to_string()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next().map_err(|err| StorageError::Read(err.to_string()))? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
    }

    fn record_attempt(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let id = id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE pending_identifications
                 SET attempts = attempts + 1,
                     last_attempt_at = ?1
                 WHERE id = ?2",
                params![at.to_rfc3339(), id],
            )
            .map_err(|err| StorageError::Write(format!("failed to record attempt: {err}")))?;
            Ok(())
        })
    }

    fn mark_synced(&self, id: &str, summary: &str) -> Result<(), StorageError> {
        let id = id.to_string();
        let summary = summary.to_string();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE pending_identifications
                     SET synced = 1,
                         result_summary = ?1
                     WHERE id = ?2",
                    params![summary, id],
                )
                .map_err(|err| StorageError::Write(format!("failed to mark synced: {err}")))?;
            if updated == 0 {
                return Err(StorageError::Write(format!("no record with id {id}")));
            }
            Ok(())
        })
    }

    fn unsynced_count(&self) -> Result<u32, StorageError> {
        self.execute(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM pending_identifications WHERE synced = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(|err| StorageError::Read(err.to_string()))?;
            Ok(count.max(0) as u32)
        })
    }
}

/// In-memory store for tests and the demo binary. Same contract as the
/// SQLite store minus the durability.
#[derive(Default, Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<String, PendingIdentification>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn insert(&self, record: &PendingIdentification) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.id) {
            return Err(StorageError::Write(format!("duplicate id {}", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<PendingIdentification>, StorageError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    fn list_unsynced(&self) -> Result<Vec<PendingIdentification>, StorageError> {
        let records = self.records.lock().unwrap();
        let mut unsynced: Vec<_> = records.values().filter(|r| !r.synced).cloned().collect();
        unsynced.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(unsynced)
    }

    fn list_all(&self) -> Result<Vec<PendingIdentification>, StorageError> {
        let records = self.records.lock().unwrap();
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    fn record_attempt(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(id) {
            record.attempts += 1;
            record.last_attempt_at = Some(at);
        }
        Ok(())
    }

    fn mark_synced(&self, id: &str, summary: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::Write(format!("no record with id {id}")))?;
        record.synced = true;
        record.result_summary = Some(summary.to_string());
        Ok(())
    }

    fn unsynced_count(&self) -> Result<u32, StorageError> {
        let records = self.records.lock().unwrap();
        Ok(records.values().filter(|r| !r.synced).count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, created_at: DateTime<Utc>) -> PendingIdentification {
        PendingIdentification::new(
            id.to_string(),
            "user-1".to_string(),
            vec![0xFF, 0xD8, 0x01],
            created_at,
            true,
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn records_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");

        {
            let store = SqliteStore::open(path.clone()).unwrap();
            store.insert(&record("a", at(0))).unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        let unsynced = store.list_unsynced().unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, "a");
        assert!(!unsynced[0].synced);
        assert_eq!(unsynced[0].image_jpeg, vec![0xFF, 0xD8, 0x01]);
    }

    #[test]
    fn unsynced_listing_is_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("queue.sqlite3")).unwrap();

        store.insert(&record("b", at(10))).unwrap();
        store.insert(&record("c", at(20))).unwrap();
        store.insert(&record("a", at(0))).unwrap();

        let ids: Vec<_> = store
            .list_unsynced()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn mark_synced_persists_the_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("queue.sqlite3")).unwrap();

        store.insert(&record("a", at(0))).unwrap();
        store.mark_synced("a", "Monstera deliciosa (97%)").unwrap();

        let synced = store.get("a").unwrap().unwrap();
        assert!(synced.synced);
        assert_eq!(synced.result_summary.as_deref(), Some("Monstera deliciosa (97%)"));
        assert_eq!(store.unsynced_count().unwrap(), 0);
        // Synced records stay in local history.
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn attempts_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("queue.sqlite3")).unwrap();

        store.insert(&record("a", at(0))).unwrap();
        store.record_attempt("a", at(5)).unwrap();
        store.record_attempt("a", at(9)).unwrap();

        let rec = store.get("a").unwrap().unwrap();
        assert_eq!(rec.attempts, 2);
        assert_eq!(rec.last_attempt_at, Some(at(9)));
    }

    #[test]
    fn mark_synced_on_missing_record_is_an_error() {
        let store = MemoryStore::new();
        assert!(store.mark_synced("missing", "x").is_err());
    }

    #[test]
    fn memory_store_matches_the_ordering_contract() {
        let store = MemoryStore::new();
        store.insert(&record("b", at(10))).unwrap();
        store.insert(&record("a", at(0))).unwrap();

        let ids: Vec<_> = store
            .list_unsynced()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
