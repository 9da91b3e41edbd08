//! # docrest
//!
//! Generic CRUD REST endpoints over document collections, with a staged hook
//! pipeline for every operation.
//!
//! ## Features
//!
//! - **Five operations per endpoint**: list, read one, create, update, delete
//! - **Hook pipeline**: pre-serve, pre-find, post-retrieve, pre-save,
//!   pre-response, post-read and post-write hooks, registered per operation
//! - **Allow-listed query filters**: equality, `$in_`, `$regex_`, comparisons
//!   on integers and timestamps, optional full-query mode
//! - **Model capabilities**: validation, change tracking, typed identity
//! - **Soft delete** into an archive collection
//! - **Collection-name redirection** per request (tenancy, sharding)
//! - **Bounded post-write worker pool**, drained on graceful shutdown
//! - **Uniform envelopes** for success and error responses
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docrest::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Page {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     id: Option<ObjectId>,
//!     content: String,
//! }
//!
//! impl Model for Page {}
//!
//! let db: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());
//!
//! ServerBuilder::new()
//!     .register(
//!         Endpoint::new("/api/pages", db, Page::default)
//!             .query_params(["content", "$regexi_content"])
//!             .pre_find(OperationSet::READ, |_: &RequestContext, _: Operation, f: &mut Filter| {
//!                 f.insert("published", json!(true));
//!                 Ok(())
//!             }),
//!     )
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        dispatch::PostWriteJob,
        envelope::{ErrorEnvelope, ListResponse, SingleResponse},
        error::{EndpointError, HookError, HookResult, StorageError},
        filter::{Document, Filter},
        hooks::{Operation, OperationSet, RequestContext},
        model::{DiffTrackable, FieldKind, Identifiable, Model, ModelFactory, Validatable},
        object_id::ObjectId,
        query::{PaginationInfo, SortField},
    };

    // === Storage ===
    pub use crate::storage::{Collection, Cursor, Database, InMemoryDatabase, SaveResult};

    // === Config ===
    pub use crate::config::{DispatchConfig, EndpointConfig, PaginationConfig, ServiceConfig};

    // === Server ===
    pub use crate::server::{Endpoint, EndpointRegistry, ServerBuilder};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::json;
    pub use std::sync::Arc;

    // === Axum ===
    pub use axum::{
        Router,
        extract::Request,
        http::StatusCode,
        middleware::Next,
        response::{IntoResponse, Response},
    };
}
