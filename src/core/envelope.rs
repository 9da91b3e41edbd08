//! Response envelopes
//!
//! ```text
//! single  {"data": {...}}
//! list    {"pagination": {...}, "data": [...]}
//! error   {"error": "..."}
//! errors  {"errors": ["...", ...]}
//! ```

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::core::query::PaginationInfo;

/// Envelope for a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleResponse<M> {
    pub data: M,
}

impl<M> SingleResponse<M> {
    pub fn new(data: M) -> Self {
        Self { data }
    }
}

/// Envelope for a page of resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<M> {
    pub pagination: PaginationInfo,
    pub data: Vec<M>,
}

impl<M> ListResponse<M> {
    pub fn new(pagination: PaginationInfo, data: Vec<M>) -> Self {
        Self { pagination, data }
    }
}

/// Error envelope; exactly one of the two shapes is ever produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorEnvelope {
    Single { error: String },
    Multi { errors: Vec<String> },
}

impl ErrorEnvelope {
    pub fn single(message: impl Into<String>) -> Self {
        ErrorEnvelope::Single {
            error: message.into(),
        }
    }

    pub fn multi(messages: Vec<String>) -> Self {
        ErrorEnvelope::Multi { errors: messages }
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
