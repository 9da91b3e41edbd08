//! Storage collaborator contract
//!
//! The pipeline talks to storage only through these traits. Documents are JSON
//! objects; filters are MongoDB-dialect expressions (see [`Filter`]).
//!
//! [`in_memory`] provides a complete engine for tests and development.

pub mod in_memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::error::StorageError;
use crate::core::filter::{Document, Filter};
use crate::core::query::{PaginationInfo, SortField};

pub use in_memory::{InMemoryCollection, InMemoryDatabase};

/// Suffix appended to a collection name for soft-delete archives
pub const ARCHIVE_SUFFIX: &str = "_deleted";

/// Outcome of a save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveResult {
    pub success: bool,
    pub validation_errors: Vec<String>,
}

impl SaveResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            validation_errors: Vec::new(),
        }
    }

    pub fn rejected(validation_errors: Vec<String>) -> Self {
        Self {
            success: false,
            validation_errors,
        }
    }
}

/// A lazily materialized result set
#[async_trait]
pub trait Cursor: Send {
    /// Apply a sort order; must be called before [`Cursor::paginate`]
    fn sort(&mut self, fields: &[SortField]);

    /// Restrict the cursor to one page and report page metadata
    async fn paginate(&mut self, per_page: usize, page: usize) -> Result<PaginationInfo, StorageError>;

    /// Next document, or `None` when the cursor is exhausted
    async fn next(&mut self) -> Result<Option<Document>, StorageError>;
}

/// One named collection of documents
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn find(&self, filter: &Filter) -> Result<Box<dyn Cursor>, StorageError>;

    /// First matching document; [`StorageError::NotFound`] when nothing matches
    async fn find_one(&self, filter: &Filter) -> Result<Document, StorageError>;

    /// Insert or replace by `_id`, assigning a fresh id when missing
    async fn save(&self, document: &mut Document) -> Result<SaveResult, StorageError>;

    async fn delete(&self, document: &Document) -> Result<(), StorageError>;

    /// Replace the first document matching `key`, or insert
    async fn upsert(&self, key: &Filter, document: Document) -> Result<(), StorageError>;
}

/// Source of collections, owned by each endpoint
pub trait Database: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}
