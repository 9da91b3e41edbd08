//! Table-driven request pipeline
//!
//! Each [`Operation`] runs a fixed list of [`Stage`]s in order. A stage either
//! advances the [`Exchange`] or fails with an [`EndpointError`]; the first
//! failure ends the request and renders the error envelope.
//!
//! ```text
//! readList  PreServe BuildQueryFilter PreFind Paginate RetrieveMany PreResponseList
//! readOne   PreServe BuildIdFilter PreFind RetrieveOne PreResponseSingle
//! create    PreServe DecodeNew PreSave Persist PreResponseSingle
//! update    PreServe BuildIdFilter PreFind RetrieveOne PostRetrieve CaptureIdentity
//!           DecodeOver RestoreIdentity PreSave Persist PreResponseSingle
//! delete    PreServe BuildIdFilter PreFind RetrieveOne PostRetrieve Archive PersistDelete
//! ```
//!
//! After the last stage the result is serialized. Read operations then run
//! their post-read hooks synchronously; write operations hand a
//! [`PostWriteJob`] to the endpoint's dispatcher.

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{Instrument, debug, warn};

use crate::core::dispatch::{PostWriteDispatcher, PostWriteJob};
use crate::core::envelope::{ListResponse, SingleResponse};
use crate::core::error::EndpointError;
use crate::core::filter::{Document, Filter, ID_FIELD, is_extended_literal};
use crate::core::hooks::{Hooks, Operation, RequestContext};
use crate::core::model::{Model, ModelFactory, validation_errors};
use crate::core::object_id::ObjectId;
use crate::core::query::{ListParams, PaginationInfo, SortField};
use crate::core::translator::QueryTranslator;
use crate::storage::{ARCHIVE_SUFFIX, Collection, Cursor, Database};

/// Message for an unparseable `{id}` path segment
pub const INVALID_ID_MESSAGE: &str = "Invalid ID";

/// Message when storage refuses a save without giving reasons
pub const SAVE_FAILED_MESSAGE: &str = "Failed to save document";

/// One step of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreServe,
    BuildQueryFilter,
    BuildIdFilter,
    PreFind,
    Paginate,
    RetrieveMany,
    RetrieveOne,
    PostRetrieve,
    CaptureIdentity,
    DecodeNew,
    DecodeOver,
    RestoreIdentity,
    PreSave,
    Persist,
    Archive,
    PersistDelete,
    PreResponseSingle,
    PreResponseList,
}

/// Stage list for an operation
pub fn stages(op: Operation) -> &'static [Stage] {
    use Stage::*;
    match op {
        Operation::ReadList => &[
            PreServe,
            BuildQueryFilter,
            PreFind,
            Paginate,
            RetrieveMany,
            PreResponseList,
        ],
        Operation::ReadOne => &[PreServe, BuildIdFilter, PreFind, RetrieveOne, PreResponseSingle],
        Operation::Create => &[PreServe, DecodeNew, PreSave, Persist, PreResponseSingle],
        Operation::Update => &[
            PreServe,
            BuildIdFilter,
            PreFind,
            RetrieveOne,
            PostRetrieve,
            CaptureIdentity,
            DecodeOver,
            RestoreIdentity,
            PreSave,
            Persist,
            PreResponseSingle,
        ],
        Operation::Delete => &[
            PreServe,
            BuildIdFilter,
            PreFind,
            RetrieveOne,
            PostRetrieve,
            Archive,
            PersistDelete,
        ],
    }
}

/// List defaults for an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSettings {
    pub per_page: usize,
    pub max_per_page: usize,
    pub sort: Vec<SortField>,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            per_page: crate::core::query::DEFAULT_PER_PAGE,
            max_per_page: crate::core::query::MAX_PER_PAGE,
            sort: Vec::new(),
        }
    }
}

/// Per-request state threaded through the stages
pub struct Exchange<M> {
    pub ctx: RequestContext,
    pub operation: Operation,
    pub body: Bytes,
    collection: Arc<dyn Collection>,
    filter: Filter,
    cursor: Option<Box<dyn Cursor>>,
    pagination: PaginationInfo,
    document: Option<Document>,
    instance: Option<M>,
    identity: Option<Value>,
    list: Vec<M>,
    single: Option<SingleResponse<M>>,
    list_response: Option<ListResponse<M>>,
    snapshot: Option<M>,
}

impl<M> Exchange<M> {
    fn new(ctx: RequestContext, operation: Operation, body: Bytes, collection: Arc<dyn Collection>) -> Self {
        Self {
            ctx,
            operation,
            body,
            collection,
            filter: Filter::new(),
            cursor: None,
            pagination: PaginationInfo::default(),
            document: None,
            instance: None,
            identity: None,
            list: Vec::new(),
            single: None,
            list_response: None,
            snapshot: None,
        }
    }

    fn take_instance(&mut self) -> Result<M, EndpointError> {
        self.instance
            .take()
            .ok_or_else(|| EndpointError::internal("pipeline reached a model stage without a model"))
    }
}

/// Executes operations for one endpoint
pub struct Pipeline<M: Model> {
    pub resource: String,
    pub collection: String,
    pub database: Arc<dyn Database>,
    pub factory: Arc<dyn ModelFactory<M>>,
    pub hooks: Arc<Hooks<M>>,
    pub translator: QueryTranslator,
    pub list: ListSettings,
    pub soft_delete: bool,
    pub dispatcher: Arc<PostWriteDispatcher<M>>,
}

impl<M: Model> Pipeline<M> {
    /// Run `op` to completion and build the HTTP response
    pub async fn execute(&self, op: Operation, ctx: RequestContext, body: Bytes) -> Response {
        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id,
            operation = %op,
            resource = %self.resource,
        );

        async move {
            match self.run(op, ctx, body).await {
                Ok(response) => response,
                Err(err) => err.into_response(),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, op: Operation, ctx: RequestContext, body: Bytes) -> Result<Response, EndpointError> {
        let collection_name = self.hooks.resolve_collection(&ctx, &self.collection);
        let collection = self.database.collection(&collection_name);
        let mut exchange = Exchange::new(ctx, op, body, collection);

        for stage in stages(op) {
            debug!(stage = ?stage, collection = %collection_name, "running stage");
            self.run_stage(*stage, &mut exchange).await?;
        }

        self.respond(exchange)
    }

    async fn run_stage(&self, stage: Stage, ex: &mut Exchange<M>) -> Result<(), EndpointError> {
        let op = ex.operation;
        match stage {
            Stage::PreServe => {
                for hook in self.hooks.pre_serve.get(op) {
                    hook.run(&ex.ctx, op, &ex.body).await?;
                }
            }
            Stage::BuildQueryFilter => {
                let blank = self.factory.create();
                ex.filter = self.translator.translate(&ex.ctx.query, &blank)?;
            }
            Stage::BuildIdFilter => {
                let raw = ex.ctx.resource_id.as_deref().unwrap_or_default();
                let id = ObjectId::parse_str(raw).map_err(|_| EndpointError::bad_request(INVALID_ID_MESSAGE))?;
                ex.filter = Filter::by_id(&id);
            }
            Stage::PreFind => {
                for hook in self.hooks.pre_find.get(op) {
                    hook.run(&ex.ctx, op, &mut ex.filter).await?;
                }
            }
            Stage::Paginate => {
                let params = ListParams::from_pairs(&ex.ctx.query, self.list.per_page, self.list.max_per_page);
                let sort = if params.sort.is_empty() {
                    &self.list.sort
                } else {
                    &params.sort
                };
                let mut cursor = ex.collection.find(&ex.filter).await?;
                cursor.sort(sort);
                ex.pagination = cursor.paginate(params.per_page, params.page).await?;
                ex.cursor = Some(cursor);
            }
            Stage::RetrieveMany => {
                if let Some(mut cursor) = ex.cursor.take() {
                    while let Some(document) = cursor.next().await? {
                        ex.list.push(decode_stored(document)?);
                    }
                }
            }
            Stage::RetrieveOne => {
                let document = ex.collection.find_one(&ex.filter).await?;
                ex.instance = Some(decode_stored(document.clone())?);
                ex.document = Some(document);
            }
            Stage::PostRetrieve => {
                let instance = present(&mut ex.instance)?;
                for hook in self.hooks.post_retrieve.get(op) {
                    hook.run(&ex.ctx, op, instance).await?;
                }
            }
            Stage::CaptureIdentity => {
                ex.identity = ex.document.as_ref().and_then(|doc| doc.get(ID_FIELD).cloned());
            }
            Stage::DecodeNew => {
                let blank = self.factory.create();
                ex.instance = Some(decode_body(blank, &ex.body)?);
            }
            Stage::DecodeOver => {
                let mut current = ex.take_instance()?;
                if let Some(tracker) = current.as_diff_trackable() {
                    tracker.reset_tracker();
                }
                ex.instance = Some(decode_body(current, &ex.body)?);
            }
            Stage::RestoreIdentity => {
                if let Some(identity) = ex.identity.clone() {
                    let instance = ex.take_instance()?;
                    ex.instance = Some(restore_identity(instance, identity)?);
                }
            }
            Stage::PreSave => {
                let instance = present(&mut ex.instance)?;
                for hook in self.hooks.pre_save.get(op) {
                    hook.run(&ex.ctx, op, instance).await?;
                }
            }
            Stage::Persist => {
                let instance = ex.take_instance()?;
                let errors = validation_errors(&instance);
                if !errors.is_empty() {
                    return Err(EndpointError::Validation(errors));
                }

                let mut document = to_document(&instance)?;
                let result = ex.collection.save(&mut document).await?;
                if !result.validation_errors.is_empty() {
                    return Err(EndpointError::Validation(result.validation_errors));
                }
                if !result.success {
                    return Err(EndpointError::SaveFailed(SAVE_FAILED_MESSAGE.to_string()));
                }

                let saved: M = decode_stored(document)?;
                ex.snapshot = Some(saved.clone());
                ex.instance = Some(saved);
            }
            Stage::Archive => {
                if self.soft_delete {
                    if let Some(document) = ex.document.clone() {
                        let name = format!("{}{}", ex.collection.name(), ARCHIVE_SUFFIX);
                        self.archive(name, document).await;
                    }
                }
            }
            Stage::PersistDelete => {
                let document = ex
                    .document
                    .as_ref()
                    .ok_or_else(|| EndpointError::internal("delete reached without a stored document"))?;
                ex.collection.delete(document).await?;
                ex.snapshot = ex.instance.take();
            }
            Stage::PreResponseSingle => {
                let mut envelope = SingleResponse::new(ex.take_instance()?);
                for hook in self.hooks.pre_response_single.get(op) {
                    hook.run(&ex.ctx, op, &mut envelope).await?;
                }
                ex.single = Some(envelope);
            }
            Stage::PreResponseList => {
                let mut envelope = ListResponse::new(ex.pagination, std::mem::take(&mut ex.list));
                for hook in self.hooks.pre_response_list.get(op) {
                    hook.run(&ex.ctx, op, &mut envelope).await?;
                }
                ex.list_response = Some(envelope);
            }
        }
        Ok(())
    }

    /// Best-effort copy into the archive collection; failures only warn
    async fn archive(&self, name: String, document: Document) {
        let mut key = Filter::new();
        if let Some(id) = document.get(ID_FIELD) {
            match ObjectId::from_json(id) {
                Some(oid) => key = Filter::by_id(&oid),
                None => {
                    key.insert(ID_FIELD, id.clone());
                }
            }
        }

        if let Err(e) = self.database.collection(&name).upsert(&key, document).await {
            warn!(archive = %name, error = %e, "soft-delete archive failed, deleting anyway");
        }
    }

    fn respond(&self, mut ex: Exchange<M>) -> Result<Response, EndpointError> {
        let op = ex.operation;
        let response = match op {
            Operation::ReadList => {
                let envelope = ex
                    .list_response
                    .take()
                    .ok_or_else(|| EndpointError::internal("list response missing"))?;
                let value = serde_json::to_value(&envelope)?;
                let response = json_response(StatusCode::OK, &value)?;
                self.post_read(&ex.ctx, op, &value);
                response
            }
            Operation::ReadOne => {
                let envelope = ex
                    .single
                    .take()
                    .ok_or_else(|| EndpointError::internal("single response missing"))?;
                let value = serde_json::to_value(&envelope)?;
                let response = json_response(StatusCode::OK, &value)?;
                self.post_read(&ex.ctx, op, &value);
                response
            }
            Operation::Create | Operation::Update => {
                let envelope = ex
                    .single
                    .take()
                    .ok_or_else(|| EndpointError::internal("single response missing"))?;
                let status = if op == Operation::Create {
                    StatusCode::CREATED
                } else {
                    StatusCode::OK
                };
                json_response(status, &serde_json::to_value(&envelope)?)?
            }
            Operation::Delete => (StatusCode::OK, "OK").into_response(),
        };

        if op.is_write() {
            if let Some(snapshot) = ex.snapshot.take() {
                self.dispatcher.dispatch(PostWriteJob {
                    operation: op,
                    context: ex.ctx,
                    snapshot,
                });
            }
        }

        Ok(response)
    }

    fn post_read(&self, ctx: &RequestContext, op: Operation, body: &Value) {
        for hook in self.hooks.post_read.get(op) {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| hook.run(ctx, op, body)));
            if outcome.is_err() {
                warn!(operation = %op, request_id = %ctx.request_id, "post-read hook panicked");
            }
        }
    }
}

fn present<M>(slot: &mut Option<M>) -> Result<&mut M, EndpointError> {
    slot.as_mut()
        .ok_or_else(|| EndpointError::internal("pipeline reached a model stage without a model"))
}

fn json_response(status: StatusCode, value: &Value) -> Result<Response, EndpointError> {
    let bytes = serde_json::to_vec(value)?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response())
}

fn decode_stored<M: Model>(document: Document) -> Result<M, EndpointError> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| EndpointError::internal(format!("stored document does not decode: {e}")))
}

fn to_document<M: Model>(instance: &M) -> Result<Document, EndpointError> {
    match serde_json::to_value(instance)? {
        Value::Object(map) => Ok(map),
        _ => Err(EndpointError::internal("model did not serialize to an object")),
    }
}

/// Decode a request body over an existing instance.
///
/// Fields absent from the body keep their current values. Nested objects are
/// merged key by key.
fn decode_body<M: Model>(current: M, body: &[u8]) -> Result<M, EndpointError> {
    let patch: Value = serde_json::from_slice(body)
        .map_err(|e| EndpointError::bad_request(format!("Invalid body: {e}")))?;
    let Value::Object(patch) = patch else {
        return Err(EndpointError::bad_request("Invalid body: expected a JSON object"));
    };

    let mut base = to_document(&current)?;
    let changed: Vec<String> = patch.keys().cloned().collect();
    merge(&mut base, patch);

    let mut decoded: M = serde_json::from_value(Value::Object(base))
        .map_err(|e| EndpointError::bad_request(format!("Invalid body: {e}")))?;

    // Decoding builds a fresh value, so only the client's fields are recorded
    if let Some(tracker) = decoded.as_diff_trackable() {
        tracker.reset_tracker();
        for field in &changed {
            tracker.mark_modified(field);
        }
    }
    Ok(decoded)
}

fn merge(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Object(incoming) if !is_extended_literal(&incoming) => {
                if let Some(Value::Object(existing)) = base.get_mut(&key) {
                    merge(existing, incoming);
                } else {
                    base.insert(key, Value::Object(incoming));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn restore_identity<M: Model>(mut instance: M, identity: Value) -> Result<M, EndpointError> {
    if let Some(id) = ObjectId::from_json(&identity) {
        let applied = match instance.as_identifiable() {
            Some(identifiable) => {
                identifiable.set_id(id);
                true
            }
            None => false,
        };
        if applied {
            return Ok(instance);
        }
    }
    let mut document = to_document(&instance)?;
    document.insert(ID_FIELD.to_string(), identity);
    decode_stored(document)
}
