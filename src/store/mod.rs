//! Metadata store contract.
//!
//! The vault only talks to its relational ledger through [`MetadataStore`] and
//! [`ClaimTransaction`]. Driver failures are classified into [`StoreErrorKind`]
//! so callers can tell a lost serialization race from a real fault without
//! inspecting driver error types.

pub mod sqlite;

#[cfg(test)]
pub mod memory;

pub use sqlite::SqliteMetadataStore;

use async_trait::async_trait;
use std::fmt;

use crate::models::{FileTypePolicy, NewStoredFile, StoredFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Another transaction touched the same rows; retry the whole transaction.
    SerializationConflict,
    Timeout,
    NotFound,
    Constraint,
    Unavailable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::SerializationConflict, message)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) => classify_sqlite_code(db_err.code().as_deref()),
            sqlx::Error::PoolTimedOut => StoreErrorKind::Timeout,
            sqlx::Error::RowNotFound => StoreErrorKind::NotFound,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                StoreErrorKind::Unavailable
            }
            _ => StoreErrorKind::Other,
        };
        StoreError::new(kind, err.to_string())
    }
}

/// Map an SQLite (extended) result code to a store error kind.
fn classify_sqlite_code(code: Option<&str>) -> StoreErrorKind {
    let Some(code) = code.and_then(|c| c.parse::<i32>().ok()) else {
        return StoreErrorKind::Other;
    };
    // Extended codes keep the primary code in the low byte.
    match code & 0xff {
        // SQLITE_BUSY, SQLITE_LOCKED
        5 | 6 => StoreErrorKind::SerializationConflict,
        // SQLITE_CONSTRAINT
        19 => StoreErrorKind::Constraint,
        _ => StoreErrorKind::Other,
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Relational ledger for stored files, file type policies and tags.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert the type with the given ceiling unless it exists, then return the stored policy.
    async fn register_file_type(
        &self,
        type_id: &str,
        default_allowed_size: i64,
    ) -> StoreResult<FileTypePolicy>;

    async fn list_file_types(&self) -> StoreResult<Vec<FileTypePolicy>>;

    async fn update_file_type(
        &self,
        type_id: &str,
        allowed_size: Option<i64>,
        is_banned: Option<bool>,
    ) -> StoreResult<FileTypePolicy>;

    /// Sum of `size` over live files.
    async fn aggregate_size(&self) -> StoreResult<i64>;

    /// Insert the file row together with unseen tags and the file/tag links.
    async fn insert_file(&self, file: &NewStoredFile) -> StoreResult<StoredFile>;

    /// Live files, oldest first.
    async fn list_files(&self) -> StoreResult<Vec<StoredFile>>;

    /// Open a serializable transaction for a claim.
    async fn begin_claim(&self) -> StoreResult<Box<dyn ClaimTransaction>>;
}

/// An open claim transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait ClaimTransaction: Send {
    /// Select one candidate and delete it inside the transaction.
    ///
    /// Candidates are files carrying any of `tags` (when given) and named any of
    /// `names` (when given), oldest first. When the filters match nothing the
    /// globally oldest file is taken instead. `None` means the vault is empty.
    async fn take_one(&mut self, names: &[String], tags: &[String])
        -> StoreResult<Option<StoredFile>>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;
}
