//! Core module containing fundamental traits and types for the framework

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod model;
pub mod object_id;
pub mod pipeline;
pub mod query;
pub mod translator;

pub use dispatch::{PostWriteDispatcher, PostWriteJob};
pub use envelope::{ErrorEnvelope, ListResponse, SingleResponse};
pub use error::{EndpointError, HookError, HookResult, StorageError};
pub use filter::{Document, Filter};
pub use hooks::{Operation, OperationSet, RequestContext};
pub use model::{DiffTrackable, FieldKind, Identifiable, Model, ModelFactory, Validatable};
pub use object_id::ObjectId;
pub use query::{ListParams, PaginationInfo, SortDirection, SortField};
pub use translator::QueryTranslator;
