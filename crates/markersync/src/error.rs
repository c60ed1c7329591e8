//! Error types for markersync.
//!
//! This module defines all error types used throughout the markersync crate,
//! from the sync taxonomy (invalid coordinates, fetch/write/delete failures,
//! missing owner) down to storage and configuration plumbing.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for markersync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Sync Errors ===
    /// A coordinate lies outside the valid latitude/longitude range.
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },

    /// Reading markers from the document store failed.
    #[error("failed to fetch markers for owner '{owner}': {message}")]
    FetchFailure {
        /// Owner whose collection was read.
        owner: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Writing a marker to the document store failed.
    #[error("failed to write marker for owner '{owner}': {message}")]
    WriteFailure {
        /// Owner whose collection was written.
        owner: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Deleting markers from the document store failed.
    #[error("failed to delete markers for owner '{owner}': {message}")]
    DeleteFailure {
        /// Owner whose collection was modified.
        owner: String,
        /// Description of what went wrong.
        message: String,
    },

    /// No authenticated owner is available.
    #[error("no authenticated owner")]
    NotAuthenticated,

    /// A stored document is missing required fields or has the wrong shape.
    #[error("malformed record '{doc_id}': {reason}")]
    MalformedRecord {
        /// Document identifier of the offending record.
        doc_id: String,
        /// Why the record was rejected.
        reason: String,
    },

    /// A marker of the same kind already occupies the coordinate.
    #[error("a {kind} marker already exists at ({latitude}, {longitude})")]
    PlacementConflict {
        /// Kind tag of the conflicting marker.
        kind: &'static str,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },

    // === Collaborator Errors ===
    /// Uploading an object failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// Reverse geocoding failed.
    #[error("geocoding failed: {0}")]
    Geocode(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for markersync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a fetch failure for the given owner.
    #[must_use]
    pub fn fetch_failure(owner: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchFailure {
            owner: owner.into(),
            message: message.into(),
        }
    }

    /// Create a write failure for the given owner.
    #[must_use]
    pub fn write_failure(owner: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailure {
            owner: owner.into(),
            message: message.into(),
        }
    }

    /// Create a delete failure for the given owner.
    #[must_use]
    pub fn delete_failure(owner: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeleteFailure {
            owner: owner.into(),
            message: message.into(),
        }
    }

    /// Create a malformed record error.
    #[must_use]
    pub fn malformed(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error means no owner was signed in.
    #[must_use]
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, Self::NotAuthenticated)
    }

    /// Check if this error is a recoverable, skippable record problem.
    #[must_use]
    pub fn is_malformed_record(&self) -> bool {
        matches!(self, Self::MalformedRecord { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotAuthenticated;
        assert_eq!(err.to_string(), "no authenticated owner");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_invalid_coordinate_display() {
        let err = Error::InvalidCoordinate {
            latitude: 91.0,
            longitude: 10.0,
        };
        assert_eq!(err.to_string(), "invalid coordinate (91, 10)");
    }

    #[test]
    fn test_is_not_authenticated() {
        assert!(Error::NotAuthenticated.is_not_authenticated());
        assert!(!Error::internal("x").is_not_authenticated());
    }

    #[test]
    fn test_is_malformed_record() {
        let err = Error::malformed("doc-1", "missing latitude");
        assert!(err.is_malformed_record());
        assert!(err.to_string().contains("doc-1"));
        assert!(err.to_string().contains("missing latitude"));
        assert!(!Error::NotAuthenticated.is_malformed_record());
    }

    #[test]
    fn test_failure_constructors_carry_owner() {
        let fetch = Error::fetch_failure("alice", "offline");
        assert!(fetch.to_string().contains("alice"));
        assert!(fetch.to_string().contains("offline"));

        let write = Error::write_failure("bob", "disk full");
        assert!(write.to_string().contains("bob"));

        let delete = Error::delete_failure("carol", "rolled back");
        assert!(delete.to_string().contains("rolled back"));
    }

    #[test]
    fn test_placement_conflict_display() {
        let err = Error::PlacementConflict {
            kind: "sighting",
            latitude: 1.5,
            longitude: 2.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("sighting"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "drift threshold must be positive".to_string(),
        };
        assert!(err.to_string().contains("drift threshold"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
