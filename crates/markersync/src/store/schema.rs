//! `SQLite` schema definitions for the document store.

/// SQL statement to create the documents table.
///
/// Every document lives in a slash-separated collection path, for example
/// `users/alice/markers`, and carries its body as JSON text.
pub const CREATE_DOCUMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, doc_id)
)
";

/// SQL statement to create an index on collection for listing.
pub const CREATE_COLLECTION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// SQL statement to create the additions journal.
///
/// `seq` is `AUTOINCREMENT`, so it only ever grows even when documents are
/// deleted. Stores poll it to see documents added by other connections.
pub const CREATE_DOCUMENT_LOG_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS document_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    doc_id TEXT NOT NULL
)
";

/// Trigger that journals every inserted document.
pub const CREATE_DOCUMENT_LOG_TRIGGER: &str = r"
CREATE TRIGGER IF NOT EXISTS documents_log_insert AFTER INSERT ON documents
BEGIN
    INSERT INTO document_log (collection, doc_id) VALUES (new.collection, new.doc_id);
END
";

/// Statements added by schema version 2.
pub const DOCUMENT_LOG_STATEMENTS: &[&str] =
    &[CREATE_DOCUMENT_LOG_TABLE, CREATE_DOCUMENT_LOG_TRIGGER];

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_DOCUMENTS_TABLE,
    CREATE_COLLECTION_INDEX,
    CREATE_METADATA_TABLE,
];
