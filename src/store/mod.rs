//! Persistence boundary of the workflow.
//!
//! The engine only relies on find/save with immediate commit plus a lease on
//! queue entries. [`PgStore`] backs both traits with PostgreSQL, [`MemoryStore`]
//! keeps everything in process for tests and local runs.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{QueueEntry, Registrant};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug)]
pub enum StorageError {
    /// A write would give a second registrant an identifier already in use.
    Conflict(String),
    /// A write targeted a row that does not exist.
    Missing(String),
    /// A fenced write was refused because the writer no longer holds the lease.
    LeaseLost(String),
    Database(sqlx::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            StorageError::Missing(msg) => write!(f, "Missing row: {msg}"),
            StorageError::LeaseLost(msg) => write!(f, "Lease lost: {msg}"),
            StorageError::Database(err) => write!(f, "Database error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StorageError::Conflict(db_err.message().to_string());
            }
        }
        StorageError::Database(err)
    }
}

#[async_trait]
pub trait QueueEntryStore: Send + Sync {
    async fn find(&self, registrant_id: &str) -> Result<Option<QueueEntry>, StorageError>;

    /// Persist the request bookkeeping of `entry` if `holder` still holds the
    /// lease, else [`StorageError::LeaseLost`]. Lease fields are not written.
    async fn save(&self, entry: &QueueEntry, holder: Uuid) -> Result<(), StorageError>;

    /// Claim the entry for `holder` for `ttl`. Returns false when another
    /// holder's lease is live or the entry does not exist.
    async fn try_lease(
        &self,
        registrant_id: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    async fn release_lease(&self, registrant_id: &str, holder: Uuid) -> Result<(), StorageError>;
}

#[async_trait]
pub trait RegistrantStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Registrant>, StorageError>;

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Registrant>, StorageError>;

    /// Set the registrant's `unique_id` unless it already holds one. Fails
    /// with [`StorageError::Conflict`] if `unique_id` is held by a different
    /// registrant. No other column is written.
    async fn assign_unique_id(
        &self,
        id: &str,
        unique_id: &str,
    ) -> Result<UniqueIdAssignment, StorageError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniqueIdAssignment {
    Assigned,
    /// The registrant already held an identifier; it was left unchanged.
    AlreadyAssigned(String),
}
