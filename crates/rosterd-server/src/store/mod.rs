//! Data-store collaborators for the import pipeline
//!
//! The ingest job only sees these two capabilities: an upsert keyed by the
//! student's external identifier, and a one-shot load of the group code book.
//! `PostgresStore` is the production implementation; `MemoryStore` backs
//! tests and database-less local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::import::row::{CodeBook, ValidRow};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Persistence failure surfaced as a row-level error outcome.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("data store error: {0}")]
    Store(String),
}

/// Result of one upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: Uuid,
    /// True when a new record was created, false when an existing one was
    /// updated through its external identifier.
    pub created: bool,
}

/// Insert-or-associate by external identifier.
#[async_trait]
pub trait StudentStore: Send + Sync {
    /// Persist one validated row. An absent external id always creates a
    /// fresh record; a known external id updates the existing one.
    async fn upsert_by_external_id(&self, row: &ValidRow) -> Result<UpsertOutcome, PersistError>;
}

/// Resolves class-group and year-group labels to internal identifiers.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Load the full label-to-id maps. Called once per ingest job so row
    /// validation can stay pure.
    async fn load_code_book(&self) -> Result<CodeBook, PersistError>;
}
