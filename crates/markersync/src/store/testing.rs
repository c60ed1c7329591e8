//! Failure injection for store-dependent tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{ChangeEvent, DocumentStore, SqliteStore, StoredDocument};
use crate::error::{Error, Result};

/// An in-memory store whose operations can be switched to fail.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().expect("in-memory store"),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::internal(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn insert(&self, collection: &str, data: Value) -> Result<String> {
        Self::check(&self.fail_writes, "write")?;
        self.inner.insert(collection, data).await
    }

    async fn set(&self, collection: &str, doc_id: &str, data: Value) -> Result<()> {
        Self::check(&self.fail_writes, "write")?;
        self.inner.set(collection, doc_id, data).await
    }

    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Value>> {
        Self::check(&self.fail_reads, "read")?;
        self.inner.get(collection, doc_id).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        Self::check(&self.fail_reads, "read")?;
        self.inner.list(collection).await
    }

    async fn update_fields(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<bool> {
        Self::check(&self.fail_writes, "write")?;
        self.inner.update_fields(collection, doc_id, fields).await
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> Result<bool> {
        Self::check(&self.fail_deletes, "delete")?;
        self.inner.delete(collection, doc_id).await
    }

    async fn delete_batch(&self, collection: &str, doc_ids: &[String]) -> Result<usize> {
        Self::check(&self.fail_deletes, "delete")?;
        self.inner.delete_batch(collection, doc_ids).await
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes()
    }
}
