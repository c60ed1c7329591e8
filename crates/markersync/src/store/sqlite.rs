//! `SQLite`-backed document store.
//!
//! Every operation runs on tokio's blocking pool against one shared
//! connection. Writes made through this store are published on the change
//! feed as soon as they commit. Documents added by other connections to the
//! same database file are picked up by polling the `document_log` journal,
//! which the store starts on the first call to [`DocumentStore::changes`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::{self, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{migrations, ChangeEvent, ChangeKind, DocumentStore, StoredDocument};
use crate::error::{Error, Result};

/// Default capacity of the change feed before slow receivers start lagging.
pub const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// Default interval, in milliseconds, between polls for documents added by
/// other connections.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// [`DEFAULT_POLL_INTERVAL_MS`] as a duration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

const IN_MEMORY: &str = ":memory:";

/// Document store persisted in a single `SQLite` database.
///
/// The connection is shared behind a mutex; every public operation takes the
/// lock for the duration of one statement or one transaction, on a blocking
/// thread, and never across an `.await`.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    shared: Arc<Shared>,
    poll_interval: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    db: Mutex<Db>,
    changes: broadcast::Sender<ChangeEvent>,
}

#[derive(Debug)]
struct Db {
    conn: Connection,
    /// Set once something watches for other connections' writes.
    cursor: Option<JournalCursor>,
}

/// Position in `document_log` plus the entries this store wrote itself and
/// already published.
#[derive(Debug, Default)]
struct JournalCursor {
    last_seq: i64,
    own: BTreeSet<i64>,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_capacity(path, DEFAULT_CHANGE_CAPACITY)
    }

    /// Like [`SqliteStore::open`], with an explicit change feed capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open_with_capacity(path: impl AsRef<Path>, change_capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening document store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::initialize_schema(&conn)?;

        info!("Document store opened at {}", path.display());
        Ok(Self::from_connection(path, conn, change_capacity))
    }

    /// Create an in-memory store, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(IN_MEMORY),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self::from_connection(
            PathBuf::from(IN_MEMORY),
            conn,
            DEFAULT_CHANGE_CAPACITY,
        ))
    }

    fn from_connection(path: PathBuf, conn: Connection, change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            path,
            shared: Arc::new(Shared {
                db: Mutex::new(Db { conn, cursor: None }),
                changes,
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
            watcher: Mutex::new(None),
        }
    }

    /// Poll for other connections' additions every `interval`.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY
    }

    /// Run `f` against the database on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Db) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        task::spawn_blocking(move || {
            let mut db = shared.lock()?;
            f(&mut *db)
        })
        .await
        .map_err(|e| Error::internal(format!("document store task failed: {e}")))?
    }

    /// Start polling the journal for other connections' additions, unless a
    /// poll task is already running. In-memory databases have no other
    /// connections.
    fn ensure_watcher(&self) {
        if self.is_in_memory() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, not watching for other sessions' writes");
            return;
        };
        let Ok(mut watcher) = self.watcher.lock() else {
            return;
        };
        if watcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if let Err(e) = self.shared.lock().and_then(|mut db| db.start_cursor()) {
            warn!(error = %e, "Cannot watch for other sessions' writes");
            return;
        }

        debug!(
            interval = ?self.poll_interval,
            "Watching {} for other sessions' writes",
            self.path.display()
        );
        *watcher = Some(runtime.spawn(watch_journal(
            Arc::downgrade(&self.shared),
            self.poll_interval,
        )));
    }

    /// Number of documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 = self.shared.lock()?.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let (total_documents, collections): (i64, i64) = self.shared.lock()?.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT collection) FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.is_in_memory() {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            total_documents,
            collections,
            db_size_bytes,
        })
    }

    /// Run raw SQL against the connection.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.shared.lock()?.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Db>> {
        self.db
            .lock()
            .map_err(|_| Error::internal("document store connection lock poisoned"))
    }

    fn publish(&self, event: ChangeEvent) {
        trace!(
            collection = %event.collection,
            doc_id = %event.doc_id,
            kind = %event.kind,
            "Publishing change"
        );
        // No receivers is fine: nobody is listening.
        let _ = self.changes.send(event);
    }
}

impl Db {
    fn insert(&mut self, collection: &str, data: &Value) -> Result<String> {
        let doc_id = Uuid::new_v4().simple().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r"
            INSERT INTO documents (collection, doc_id, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ",
            params![collection, doc_id, serde_json::to_string(data)?, now],
        )?;
        self.note_own_addition(collection, &doc_id)?;
        debug!("Inserted document {} into {}", doc_id, collection);
        Ok(doc_id)
    }

    fn set(&mut self, collection: &str, doc_id: &str, data: &Value) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let existed = self.exists(collection, doc_id)?;
        self.conn.execute(
            r"
            INSERT INTO documents (collection, doc_id, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (collection, doc_id) DO UPDATE SET data = ?3, updated_at = ?4
            ",
            params![collection, doc_id, serde_json::to_string(data)?, now],
        )?;
        if !existed {
            self.note_own_addition(collection, doc_id)?;
        }
        Ok(existed)
    }

    fn exists(&self, collection: &str, doc_id: &str) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![collection, doc_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND doc_id = ?2",
                params![collection, doc_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(Error::from))
            .transpose()
    }

    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT doc_id, data FROM documents
            WHERE collection = ?1 ORDER BY rowid ASC
            ",
        )?;

        let rows = stmt
            .query_map([collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, raw)| StoredDocument {
                id,
                data: parse_body(&raw),
            })
            .collect())
    }

    fn update(
        &mut self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Option<Value>> {
        let tx = self.conn.transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND doc_id = ?2",
                params![collection, doc_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut data: Value = serde_json::from_str(&raw)?;
        let Some(object) = data.as_object_mut() else {
            return Err(Error::malformed(doc_id, "document body is not an object"));
        };
        object.extend(fields);

        tx.execute(
            r"
            UPDATE documents SET data = ?3, updated_at = ?4
            WHERE collection = ?1 AND doc_id = ?2
            ",
            params![
                collection,
                doc_id,
                serde_json::to_string(&data)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(Some(data))
    }

    fn delete(&self, collection: &str, doc_id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![collection, doc_id],
        )?;
        Ok(affected > 0)
    }

    fn delete_batch(&mut self, collection: &str, doc_ids: &[String]) -> Result<Vec<String>> {
        let tx = self.conn.transaction()?;
        let mut removed = Vec::with_capacity(doc_ids.len());
        {
            let mut stmt =
                tx.prepare("DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2")?;
            for doc_id in doc_ids {
                if stmt.execute(params![collection, doc_id])? > 0 {
                    removed.push(doc_id.clone());
                }
            }
        }
        // Dropping the transaction on an early return rolls everything back.
        tx.commit()?;
        Ok(removed)
    }

    fn start_cursor(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            let last_seq: i64 = self.conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM document_log",
                [],
                |row| row.get(0),
            )?;
            self.cursor = Some(JournalCursor {
                last_seq,
                own: BTreeSet::new(),
            });
        }
        Ok(())
    }

    /// Remember the journal entry of a document this store just added, so
    /// the poll does not publish it a second time. Called under the same
    /// lock as the insert.
    fn note_own_addition(&mut self, collection: &str, doc_id: &str) -> Result<()> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };
        let seq: Option<i64> = self.conn.query_row(
            "SELECT MAX(seq) FROM document_log WHERE collection = ?1 AND doc_id = ?2",
            params![collection, doc_id],
            |row| row.get(0),
        )?;
        if let Some(seq) = seq {
            cursor.own.insert(seq);
        }
        Ok(())
    }

    /// Additions journaled since the last poll that this store did not make.
    fn poll_foreign_additions(&mut self) -> Result<Vec<ChangeEvent>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            r"
            SELECT l.seq, l.collection, l.doc_id, d.data
            FROM document_log l
            LEFT JOIN documents d ON d.collection = l.collection AND d.doc_id = l.doc_id
            WHERE l.seq > ?1
            ORDER BY l.seq ASC
            ",
        )?;
        let rows = stmt
            .query_map([cursor.last_seq], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut events = Vec::new();
        for (seq, collection, doc_id, raw) in rows {
            cursor.last_seq = cursor.last_seq.max(seq);
            if cursor.own.remove(&seq) {
                continue;
            }
            // Already deleted again; there is nothing left to announce.
            let Some(raw) = raw else {
                continue;
            };
            events.push(ChangeEvent {
                collection,
                doc_id,
                kind: ChangeKind::Added,
                data: Some(parse_body(&raw)),
            });
        }
        let last_seq = cursor.last_seq;
        cursor.own.retain(|seq| *seq > last_seq);
        Ok(events)
    }
}

/// Bodies that are not even JSON surface as null and are rejected by
/// whoever decodes them.
fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

/// Poll the journal until the store is dropped.
async fn watch_journal(store: Weak<Shared>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = store.upgrade() else {
            debug!("Document store dropped, journal watch stopped");
            return;
        };

        let polled = task::spawn_blocking({
            let shared = Arc::clone(&shared);
            move || {
                let mut db = shared.lock()?;
                db.poll_foreign_additions()
            }
        })
        .await;

        match polled {
            Ok(Ok(events)) => {
                if !events.is_empty() {
                    debug!(count = events.len(), "Documents added by other sessions");
                }
                for event in events {
                    shared.publish(event);
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Error polling for other sessions' writes"),
            Err(e) => {
                warn!(error = %e, "Journal poll task failed");
                return;
            }
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, collection: &str, data: Value) -> Result<String> {
        let owned = collection.to_string();
        let body = data.clone();
        let doc_id = self.with_db(move |db| db.insert(&owned, &body)).await?;
        self.shared.publish(ChangeEvent {
            collection: collection.to_string(),
            doc_id: doc_id.clone(),
            kind: ChangeKind::Added,
            data: Some(data),
        });
        Ok(doc_id)
    }

    async fn set(&self, collection: &str, doc_id: &str, data: Value) -> Result<()> {
        let (owned, id, body) = (collection.to_string(), doc_id.to_string(), data.clone());
        let existed = self.with_db(move |db| db.set(&owned, &id, &body)).await?;
        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        self.shared.publish(ChangeEvent {
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            kind,
            data: Some(data),
        });
        Ok(())
    }

    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Value>> {
        let (owned, id) = (collection.to_string(), doc_id.to_string());
        self.with_db(move |db| db.get(&owned, &id)).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let owned = collection.to_string();
        self.with_db(move |db| db.list(&owned)).await
    }

    async fn update_fields(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<bool> {
        let (owned, id) = (collection.to_string(), doc_id.to_string());
        match self.with_db(move |db| db.update(&owned, &id, fields)).await? {
            Some(data) => {
                self.shared.publish(ChangeEvent {
                    collection: collection.to_string(),
                    doc_id: doc_id.to_string(),
                    kind: ChangeKind::Modified,
                    data: Some(data),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> Result<bool> {
        let (owned, id) = (collection.to_string(), doc_id.to_string());
        let deleted = self.with_db(move |db| db.delete(&owned, &id)).await?;
        if deleted {
            self.shared.publish(removed(collection, doc_id));
        }
        Ok(deleted)
    }

    async fn delete_batch(&self, collection: &str, doc_ids: &[String]) -> Result<usize> {
        let (owned, ids) = (collection.to_string(), doc_ids.to_vec());
        let removed_ids = self.with_db(move |db| db.delete_batch(&owned, &ids)).await?;
        for doc_id in &removed_ids {
            self.shared.publish(removed(collection, doc_id));
        }
        if !removed_ids.is_empty() {
            info!("Batch deleted {} documents from {}", removed_ids.len(), collection);
        }
        Ok(removed_ids.len())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        let receiver = self.shared.changes.subscribe();
        self.ensure_watcher();
        receiver
    }
}

fn removed(collection: &str, doc_id: &str) -> ChangeEvent {
    ChangeEvent {
        collection: collection.to_string(),
        doc_id: doc_id.to_string(),
        kind: ChangeKind::Removed,
        data: None,
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of documents across all collections.
    pub total_documents: i64,
    /// Number of non-empty collections.
    pub collections: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MARKERS: &str = "users/u1/markers";

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("failed to create test store")
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = create_test_store();
        let id = store.insert(MARKERS, json!({"a": 1})).await.unwrap();

        let doc = store.get(MARKERS, &id).await.unwrap();
        assert_eq!(doc, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let store = create_test_store();
        let a = store.insert(MARKERS, json!({})).await.unwrap();
        let b = store.insert(MARKERS, json!({})).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = create_test_store();
        assert!(store.get(MARKERS, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_ordered() {
        let store = create_test_store();
        let first = store.insert(MARKERS, json!({"n": 1})).await.unwrap();
        store
            .insert("users/u2/markers", json!({"n": 99}))
            .await
            .unwrap();
        let second = store.insert(MARKERS, json!({"n": 2})).await.unwrap();

        let docs = store.list(MARKERS).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_list_empty_collection() {
        let store = create_test_store();
        assert!(store.list(MARKERS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_creates_then_replaces() {
        let store = create_test_store();
        store.set("users", "u1", json!({"email": "a@b"})).await.unwrap();
        store.set("users", "u1", json!({"email": "c@d"})).await.unwrap();

        assert_eq!(
            store.get("users", "u1").await.unwrap(),
            Some(json!({"email": "c@d"}))
        );
        assert_eq!(store.count("users").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_fields_merges() {
        let store = create_test_store();
        let id = store
            .insert(MARKERS, json!({"type": "note", "latitude": 1.0}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("latitude".into(), json!(2.0));
        assert!(store.update_fields(MARKERS, &id, fields).await.unwrap());

        assert_eq!(
            store.get(MARKERS, &id).await.unwrap(),
            Some(json!({"type": "note", "latitude": 2.0}))
        );
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = create_test_store();
        assert!(!store
            .update_fields(MARKERS, "ghost", Map::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = create_test_store();
        let id = store.insert(MARKERS, json!({})).await.unwrap();

        assert!(store.delete(MARKERS, &id).await.unwrap());
        assert!(!store.delete(MARKERS, &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_batch() {
        let store = create_test_store();
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(store.insert(MARKERS, json!({"n": i})).await.unwrap());
        }

        assert_eq!(store.delete_batch(MARKERS, &ids).await.unwrap(), 3);
        assert_eq!(store.count(MARKERS).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_batch_is_atomic() {
        let store = create_test_store();
        let keep = store.insert(MARKERS, json!({"n": 1})).await.unwrap();
        let blocked = store.insert(MARKERS, json!({"n": 2})).await.unwrap();
        store
            .execute_batch(&format!(
                "CREATE TRIGGER block_delete BEFORE DELETE ON documents \
                 WHEN old.doc_id = '{blocked}' BEGIN SELECT RAISE(ABORT, 'blocked'); END;"
            ))
            .unwrap();

        let result = store
            .delete_batch(MARKERS, &[keep.clone(), blocked.clone()])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count(MARKERS).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let store = create_test_store();
        let mut rx = store.changes();

        let id = store.insert(MARKERS, json!({"n": 1})).await.unwrap();
        store.delete(MARKERS, &id).await.unwrap();

        let added = rx.recv().await.unwrap();
        assert_eq!(added.kind, ChangeKind::Added);
        assert_eq!(added.doc_id, id);
        assert_eq!(added.collection, MARKERS);

        let removed = rx.recv().await.unwrap();
        assert_eq!(removed.kind, ChangeKind::Removed);
        assert!(removed.data.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = create_test_store();
        store.insert(MARKERS, json!({})).await.unwrap();
        store.insert("users", json!({})).await.unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_open_file_based_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("markers.db");

        let id = {
            let store = SqliteStore::open(&db_path).unwrap();
            assert_eq!(store.path(), db_path);
            store.insert(MARKERS, json!({"n": 7})).await.unwrap()
        };

        let reopened = SqliteStore::open(&db_path).unwrap();
        assert_eq!(
            reopened.get(MARKERS, &id).await.unwrap(),
            Some(json!({"n": 7}))
        );
        assert!(reopened.stats().unwrap().db_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_waiting_for_connection_does_not_stall_runtime() {
        let store = create_test_store();
        let held = Arc::clone(&store.shared);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _db = held.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });
        locked_rx.recv().unwrap();

        let ticker = tokio::spawn(async {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        assert!(store.get(MARKERS, "x").await.unwrap().is_none());

        // The ticker ran to completion while the read waited on the lock.
        assert!(ticker.is_finished());
        holder.join().unwrap();
    }

    fn open_pair(dir: &tempfile::TempDir) -> (SqliteStore, SqliteStore) {
        let path = dir.path().join("shared.db");
        let open = || {
            SqliteStore::open(&path)
                .unwrap()
                .with_poll_interval(Duration::from_millis(20))
        };
        (open(), open())
    }

    async fn recv(rx: &mut broadcast::Receiver<ChangeEvent>) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for change")
            .unwrap()
    }

    #[tokio::test]
    async fn test_changes_include_other_connections_additions() {
        let dir = tempfile::tempdir().unwrap();
        let (watching, writing) = open_pair(&dir);
        let mut rx = watching.changes();

        let id = writing.insert(MARKERS, json!({"n": 1})).await.unwrap();

        let event = recv(&mut rx).await;
        assert_eq!(event.kind, ChangeKind::Added);
        assert_eq!(event.doc_id, id);
        assert_eq!(event.collection, MARKERS);
        assert_eq!(event.data, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_own_additions_published_once() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _other) = open_pair(&dir);
        let mut rx = store.changes();

        let id = store.insert(MARKERS, json!({})).await.unwrap();
        assert_eq!(recv(&mut rx).await.doc_id, id);

        // Several polls go by without the same addition coming back.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_additions_before_subscribing_are_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let (watching, writing) = open_pair(&dir);
        writing.insert(MARKERS, json!({"n": 1})).await.unwrap();

        let mut rx = watching.changes();
        let later = writing.insert(MARKERS, json!({"n": 2})).await.unwrap();

        assert_eq!(recv(&mut rx).await.doc_id, later);
    }

    #[tokio::test]
    async fn test_documents_deleted_before_poll_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (watching, writing) = open_pair(&dir);
        let mut rx = watching.changes();

        // One synchronous batch, so no poll runs in between.
        writing
            .execute_batch(&format!(
                "INSERT INTO documents VALUES ('{MARKERS}', 'gone', '{{}}', 't', 't');
                 DELETE FROM documents WHERE doc_id = 'gone';
                 INSERT INTO documents VALUES ('{MARKERS}', 'kept', '{{}}', 't', 't');"
            ))
            .unwrap();

        assert_eq!(recv(&mut rx).await.doc_id, "kept");
    }

    #[tokio::test]
    async fn test_feed_closes_when_store_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _other) = open_pair(&dir);
        let mut rx = store.changes();
        drop(store);

        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(closed, Ok(Err(broadcast::error::RecvError::Closed))));
    }
}
