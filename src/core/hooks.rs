//! Hook types and per-operation hook lists
//!
//! Hooks are registered per operation and run in registration order. Any hook
//! returning an error stops the pipeline; the error's code becomes the HTTP
//! status (zero or less means 500).
//!
//! Every hook trait has a blanket implementation for plain closures, so
//! simple hooks can be registered inline:
//!
//! ```rust,ignore
//! endpoint.pre_find(Operation::ReadList, |_: &RequestContext, _: Operation, filter: &mut Filter| {
//!     filter.insert("published", json!(true));
//!     Ok(())
//! });
//! ```

use async_trait::async_trait;
use axum::http::{Extensions, HeaderMap, Method, Uri};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::envelope::{ListResponse, SingleResponse};
use crate::core::error::HookResult;
use crate::core::filter::Filter;

/// The five operations every endpoint serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadList,
    ReadOne,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::Update,
        Operation::ReadOne,
        Operation::ReadList,
        Operation::Delete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::ReadList => "readList",
            Operation::ReadOne => "readOne",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, Operation::Create | Operation::Update | Operation::Delete)
    }

    fn index(self) -> usize {
        match self {
            Operation::ReadList => 0,
            Operation::ReadOne => 1,
            Operation::Create => 2,
            Operation::Update => 3,
            Operation::Delete => 4,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A selection of operations a hook is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSet(u8);

impl OperationSet {
    pub const ALL: OperationSet = OperationSet(0b11111);
    pub const READ: OperationSet = OperationSet(0b00011);
    pub const WRITE: OperationSet = OperationSet(0b11100);

    pub fn contains(self, op: Operation) -> bool {
        self.0 & (1 << op.index()) != 0
    }

    pub fn operations(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.contains(*op))
    }
}

impl From<Operation> for OperationSet {
    fn from(op: Operation) -> Self {
        OperationSet(1 << op.index())
    }
}

impl std::ops::BitOr for OperationSet {
    type Output = OperationSet;

    fn bitor(self, rhs: Self) -> Self {
        OperationSet(self.0 | rhs.0)
    }
}

impl std::ops::BitOr for Operation {
    type Output = OperationSet;

    fn bitor(self, rhs: Self) -> OperationSet {
        OperationSet::from(self) | OperationSet::from(rhs)
    }
}

/// Unknown operation selector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation selector: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for OperationSet {
    type Err = UnknownOperation;

    /// Accepts `*`/`all`, `read`, `write` or a single operation name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" | "all" => Ok(OperationSet::ALL),
            "read" => Ok(OperationSet::READ),
            "write" => Ok(OperationSet::WRITE),
            "readList" => Ok(Operation::ReadList.into()),
            "readOne" => Ok(Operation::ReadOne.into()),
            "create" => Ok(Operation::Create.into()),
            "update" => Ok(Operation::Update.into()),
            "delete" => Ok(Operation::Delete.into()),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// Request data visible to hooks
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Per-request id, also recorded on the tracing span
    pub request_id: Uuid,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Values inserted by middleware (e.g. an authenticated user)
    pub extensions: Extensions,
    /// The `{id}` path segment, for single-resource operations
    pub resource_id: Option<String>,
    /// Decoded query pairs in order, repeated keys kept
    pub query: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        let query = crate::core::translator::parse_query_pairs(uri.query());
        Self {
            request_id: Uuid::new_v4(),
            method,
            uri,
            headers: HeaderMap::new(),
            extensions: Extensions::new(),
            resource_id: None,
            query,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Inspects the raw request body before anything else runs
#[async_trait]
pub trait PreServeHook: Send + Sync {
    async fn run(&self, ctx: &RequestContext, op: Operation, body: &[u8]) -> HookResult;
}

#[async_trait]
impl<F> PreServeHook for F
where
    F: Fn(&RequestContext, Operation, &[u8]) -> HookResult + Send + Sync,
{
    async fn run(&self, ctx: &RequestContext, op: Operation, body: &[u8]) -> HookResult {
        self(ctx, op, body)
    }
}

/// Adds or overrides constraints before storage is queried
#[async_trait]
pub trait QueryFilter: Send + Sync {
    async fn run(&self, ctx: &RequestContext, op: Operation, filter: &mut Filter) -> HookResult;
}

#[async_trait]
impl<F> QueryFilter for F
where
    F: Fn(&RequestContext, Operation, &mut Filter) -> HookResult + Send + Sync,
{
    async fn run(&self, ctx: &RequestContext, op: Operation, filter: &mut Filter) -> HookResult {
        self(ctx, op, filter)
    }
}

/// Inspects or mutates a model instance (post-retrieve and pre-save)
#[async_trait]
pub trait DocumentFilter<M: Send>: Send + Sync {
    async fn run(&self, ctx: &RequestContext, op: Operation, model: &mut M) -> HookResult;
}

#[async_trait]
impl<M, F> DocumentFilter<M> for F
where
    M: Send + 'static,
    F: Fn(&RequestContext, Operation, &mut M) -> HookResult + Send + Sync,
{
    async fn run(&self, ctx: &RequestContext, op: Operation, model: &mut M) -> HookResult {
        self(ctx, op, model)
    }
}

/// Mutates a single-resource envelope before it is serialized
#[async_trait]
pub trait SingleResponseFilter<M: Send>: Send + Sync {
    async fn run(
        &self,
        ctx: &RequestContext,
        op: Operation,
        response: &mut SingleResponse<M>,
    ) -> HookResult;
}

#[async_trait]
impl<M, F> SingleResponseFilter<M> for F
where
    M: Send + 'static,
    F: Fn(&RequestContext, Operation, &mut SingleResponse<M>) -> HookResult + Send + Sync,
{
    async fn run(
        &self,
        ctx: &RequestContext,
        op: Operation,
        response: &mut SingleResponse<M>,
    ) -> HookResult {
        self(ctx, op, response)
    }
}

/// Mutates a list envelope before it is serialized
#[async_trait]
pub trait ListResponseFilter<M: Send>: Send + Sync {
    async fn run(
        &self,
        ctx: &RequestContext,
        op: Operation,
        response: &mut ListResponse<M>,
    ) -> HookResult;
}

#[async_trait]
impl<M, F> ListResponseFilter<M> for F
where
    M: Send + 'static,
    F: Fn(&RequestContext, Operation, &mut ListResponse<M>) -> HookResult + Send + Sync,
{
    async fn run(
        &self,
        ctx: &RequestContext,
        op: Operation,
        response: &mut ListResponse<M>,
    ) -> HookResult {
        self(ctx, op, response)
    }
}

/// Observes a serialized read response; cannot change it
pub trait PostReadHook: Send + Sync {
    fn run(&self, ctx: &RequestContext, op: Operation, body: &Value);
}

impl<F> PostReadHook for F
where
    F: Fn(&RequestContext, Operation, &Value) + Send + Sync,
{
    fn run(&self, ctx: &RequestContext, op: Operation, body: &Value) {
        self(ctx, op, body)
    }
}

/// Runs on the post-write worker pool after a successful write
#[async_trait]
pub trait PostWriteHook<M: Send + Sync>: Send + Sync {
    async fn run(&self, ctx: &RequestContext, op: Operation, snapshot: &M) -> HookResult;
}

#[async_trait]
impl<M, F> PostWriteHook<M> for F
where
    M: Send + Sync + 'static,
    F: Fn(&RequestContext, Operation, &M) -> HookResult + Send + Sync,
{
    async fn run(&self, ctx: &RequestContext, op: Operation, snapshot: &M) -> HookResult {
        self(ctx, op, snapshot)
    }
}

/// Rewrites the target collection name for a request
pub trait CollectionNameFilter: Send + Sync {
    fn resolve(&self, ctx: &RequestContext, name: String) -> String;
}

impl<F> CollectionNameFilter for F
where
    F: Fn(&RequestContext, String) -> String + Send + Sync,
{
    fn resolve(&self, ctx: &RequestContext, name: String) -> String {
        self(ctx, name)
    }
}

/// Ordered hook lists, one per operation
pub struct HookList<H: ?Sized> {
    by_operation: [Vec<Arc<H>>; 5],
}

impl<H: ?Sized> HookList<H> {
    pub fn new() -> Self {
        Self {
            by_operation: Default::default(),
        }
    }

    pub fn push(&mut self, ops: OperationSet, hook: Arc<H>) {
        for op in ops.operations() {
            self.by_operation[op.index()].push(hook.clone());
        }
    }

    pub fn get(&self, op: Operation) -> &[Arc<H>] {
        &self.by_operation[op.index()]
    }

    pub fn len(&self, op: Operation) -> usize {
        self.get(op).len()
    }
}

impl<H: ?Sized> Default for HookList<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every hook registered on an endpoint, grouped by stage
pub struct Hooks<M: Send + Sync + 'static> {
    pub pre_serve: HookList<dyn PreServeHook>,
    pub pre_find: HookList<dyn QueryFilter>,
    pub post_retrieve: HookList<dyn DocumentFilter<M>>,
    pub pre_save: HookList<dyn DocumentFilter<M>>,
    pub pre_response_single: HookList<dyn SingleResponseFilter<M>>,
    pub pre_response_list: HookList<dyn ListResponseFilter<M>>,
    pub post_read: HookList<dyn PostReadHook>,
    pub post_write: HookList<dyn PostWriteHook<M>>,
    pub collection_name: Vec<Arc<dyn CollectionNameFilter>>,
}

impl<M: Send + Sync + 'static> Default for Hooks<M> {
    fn default() -> Self {
        Self {
            pre_serve: HookList::new(),
            pre_find: HookList::new(),
            post_retrieve: HookList::new(),
            pre_save: HookList::new(),
            pre_response_single: HookList::new(),
            pre_response_list: HookList::new(),
            post_read: HookList::new(),
            post_write: HookList::new(),
            collection_name: Vec::new(),
        }
    }
}

impl<M: Send + Sync + 'static> Hooks<M> {
    /// Thread the default collection name through every name filter
    pub fn resolve_collection(&self, ctx: &RequestContext, default_name: &str) -> String {
        self.collection_name
            .iter()
            .fold(default_name.to_string(), |name, filter| filter.resolve(ctx, name))
    }
}
