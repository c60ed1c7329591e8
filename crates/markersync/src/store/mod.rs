//! Document store abstraction.
//!
//! Markers and owner profiles are JSON documents grouped into collections
//! addressed by slash-separated paths (`users/{owner}/markers`). The
//! [`DocumentStore`] trait is the only way the sync core talks to a backend;
//! [`SqliteStore`] is the bundled implementation.

pub mod migrations;
pub mod schema;
mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::Result;

pub use sqlite::{
    SqliteStore, StoreStats, DEFAULT_CHANGE_CAPACITY, DEFAULT_POLL_INTERVAL,
    DEFAULT_POLL_INTERVAL_MS,
};

/// A document as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Store-assigned document id.
    pub id: String,
    /// Document body.
    pub data: Value,
}

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The document was created.
    Added,
    /// Fields of the document were changed.
    Modified,
    /// The document was deleted.
    Removed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A change notification published by a store after a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Collection the document belongs to.
    pub collection: String,
    /// Document id.
    pub doc_id: String,
    /// What happened.
    pub kind: ChangeKind,
    /// Document body after the change; `None` for removals.
    pub data: Option<Value>,
}

/// A hosted or local document database.
///
/// Implementations must make each single-document write atomic, make
/// [`DocumentStore::delete_batch`] all-or-nothing, and publish a
/// [`ChangeEvent`] for every committed write to all receivers obtained from
/// [`DocumentStore::changes`].
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Insert a new document and return its generated id.
    async fn insert(&self, collection: &str, data: Value) -> Result<String>;

    /// Create or replace the document `doc_id`.
    async fn set(&self, collection: &str, doc_id: &str, data: Value) -> Result<()>;

    /// Read a single document.
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Value>>;

    /// All documents in a collection, oldest first.
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>>;

    /// Merge `fields` into an existing document.
    ///
    /// Returns `false` if the document does not exist.
    async fn update_fields(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<bool>;

    /// Delete one document. Returns `false` if it did not exist.
    async fn delete(&self, collection: &str, doc_id: &str) -> Result<bool>;

    /// Delete several documents in one atomic batch.
    ///
    /// Returns the number of documents removed. On error nothing is removed.
    async fn delete_batch(&self, collection: &str, doc_ids: &[String]) -> Result<usize>;

    /// Subscribe to change events for every collection.
    ///
    /// Additions made through other handles on the same backend (another
    /// process, another connection) must reach the feed too. Receivers that
    /// fall behind see `RecvError::Lagged` and should re-read.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_display() {
        assert_eq!(ChangeKind::Added.to_string(), "added");
        assert_eq!(ChangeKind::Modified.to_string(), "modified");
        assert_eq!(ChangeKind::Removed.to_string(), "removed");
    }
}
