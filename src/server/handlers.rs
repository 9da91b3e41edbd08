//! Axum handlers shared by every endpoint
//!
//! Each handler turns the request into a [`RequestContext`] plus body bytes and
//! hands both to the endpoint's pipeline.

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::envelope::ErrorEnvelope;
use crate::core::error::{EndpointError, INTERNAL_MESSAGE};
use crate::core::hooks::{Operation, RequestContext};
use crate::core::model::Model;
use crate::core::pipeline::Pipeline;

/// Header a caller may use to supply its own request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for one mounted endpoint
pub struct EndpointState<M: Model> {
    pub pipeline: Pipeline<M>,
    pub max_body_bytes: usize,
}

pub type SharedState<M> = Arc<EndpointState<M>>;

/// Turn a handler panic into the generic 500 envelope
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!(detail = %detail, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&ErrorEnvelope::single(INTERNAL_MESSAGE)).unwrap_or_default(),
    )
        .into_response()
}

pub async fn read_list<M: Model>(State(state): State<SharedState<M>>, request: Request) -> Response {
    run(state, Operation::ReadList, None, request).await
}

pub async fn create<M: Model>(State(state): State<SharedState<M>>, request: Request) -> Response {
    run(state, Operation::Create, None, request).await
}

pub async fn read_one<M: Model>(
    State(state): State<SharedState<M>>,
    Path(id): Path<String>,
    request: Request,
) -> Response {
    run(state, Operation::ReadOne, Some(id), request).await
}

pub async fn update<M: Model>(
    State(state): State<SharedState<M>>,
    Path(id): Path<String>,
    request: Request,
) -> Response {
    run(state, Operation::Update, Some(id), request).await
}

pub async fn delete<M: Model>(
    State(state): State<SharedState<M>>,
    Path(id): Path<String>,
    request: Request,
) -> Response {
    run(state, Operation::Delete, Some(id), request).await
}

async fn run<M: Model>(
    state: SharedState<M>,
    op: Operation,
    resource_id: Option<String>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => return EndpointError::bad_request(format!("Invalid body: {e}")).into_response(),
    };

    let mut ctx = RequestContext::new(parts.method, parts.uri);
    if let Some(id) = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
    {
        ctx.request_id = id;
    }
    ctx.headers = parts.headers;
    ctx.extensions = parts.extensions;
    ctx.resource_id = resource_id;

    state.pipeline.execute(op, ctx, body).await
}
