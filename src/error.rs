//! Error types for VecStore.
//!
//! VecStore uses a hierarchical error system:
//! - `VecStoreError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`) provide detail
//!
//! Absence of a record is never an error: lookups return `Ok(None)`.
//! Validation failures are the only errors a well-behaved caller should
//! expect in steady state; storage errors indicate the durability contract
//! could not be met and must not be ignored.

use thiserror::Error;

/// Result type alias for VecStore operations.
pub type Result<T> = std::result::Result<T, VecStoreError>;

/// Top-level error enum for all VecStore operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum VecStoreError {
    /// Storage layer error (WAL, scalar store, snapshot files).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Vector index error (ANN adapter operations).
    #[error("Index error: {0}")]
    Index(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VecStoreError {
    /// Creates a vector index error with the given message.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a vector index error.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

/// Storage-related errors.
///
/// These errors indicate problems with the underlying storage layer:
/// the write-ahead log, the scalar key-value store, or snapshot files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// On-disk data could not be interpreted.
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    /// Write-ahead log failure (open, append, flush).
    #[error("WAL error: {0}")]
    Wal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a WAL error with the given message.
    pub fn wal(msg: impl Into<String>) -> Self {
        Self::Wal(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

// Conversions from redb error types
impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to VecStoreError for convenience
impl From<redb::Error> for VecStoreError {
    fn from(err: redb::Error) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::DatabaseError> for VecStoreError {
    fn from(err: redb::DatabaseError) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::TransactionError> for VecStoreError {
    fn from(err: redb::TransactionError) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::CommitError> for VecStoreError {
    fn from(err: redb::CommitError) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::TableError> for VecStoreError {
    fn from(err: redb::TableError) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

impl From<redb::StorageError> for VecStoreError {
    fn from(err: redb::StorageError) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for VecStoreError {
    fn from(err: serde_json::Error) -> Self {
        VecStoreError::Storage(StorageError::from(err))
    }
}

/// Validation errors for input data.
///
/// These errors indicate problems with data provided by the caller.
/// They are always raised before any store is mutated.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Vector dimension doesn't match the configured dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// The requested index family is unknown or not initialized.
    #[error("Unknown index family: {0}")]
    UnknownFamily(String),

    /// The index family has already been initialized.
    #[error("Index family already initialized: {0}")]
    FamilyAlreadyInitialized(String),
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown family error.
    pub fn unknown_family(family: impl ToString) -> Self {
        Self::UnknownFamily(family.to_string())
    }

    /// Creates an already-initialized family error.
    pub fn family_already_initialized(family: impl ToString) -> Self {
        Self::FamilyAlreadyInitialized(family.to_string())
    }
}
