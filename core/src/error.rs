//! Error types for the batch engine.
//!
//! # Design
//! Two layers of failure exist and must never be conflated:
//!
//! - `BatchError` is a hard failure: transport problems, broken multipart
//!   framing, or a sub-response the HTTP parser could not read.
//! - `ResponseError` is an HTTP status >= 400 on one embedded response. It is
//!   carried as a *value* inside `Outcome::Failed` so that one failing
//!   operation never aborts its siblings.
//!
//! `BatchError` is `Clone` because a single changeset failure settles every
//! request in that changeset with the identical value.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::response::{Body, Response};

/// Hard failures of the batch engine.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// The transport could not complete the `$batch` round trip.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The outer response carried no `multipart/mixed; boundary=` content type.
    #[error("boundary not found")]
    BoundaryNotFound,

    /// An embedded HTTP message could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server returned fewer top-level parts than the batch holds items.
    #[error("expected {expected} response parts, found {found}")]
    PartCountMismatch { expected: usize, found: usize },

    /// A request was added to a changeset that was already sealed.
    #[error("change set {0} is committed")]
    ChangeSetCommitted(String),

    /// A request body could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// A request declared a non-JSON content type for its body.
    #[error("unsupported request body: {0}")]
    UnsupportedBody(String),

    /// No batch with this id is registered in the manager.
    #[error("batch {0} not found")]
    BatchNotFound(String),

    /// The owning batch was dropped before this outcome settled.
    #[error("outcome abandoned before settlement")]
    Abandoned,

    /// An embedded response reported an HTTP error status.
    #[error(transparent)]
    Http(#[from] ResponseError),
}

/// An embedded response with status >= 400, with the parsed response attached.
#[derive(Debug, Clone)]
pub struct ResponseError {
    response: Arc<Response>,
}

impl ResponseError {
    pub(crate) fn new(response: Arc<Response>) -> Self {
        Self { response }
    }

    pub fn status(&self) -> u16 {
        self.response.status()
    }

    pub fn response(&self) -> &Arc<Response> {
        &self.response
    }

    /// Server supplied message: `error.message.value` (V2 JSON),
    /// `error.message` (V4 JSON), the `<message>` element of an XML error, or
    /// the raw body text.
    pub fn message(&self) -> String {
        match self.response.body() {
            Body::Json(value) => json_error_message(value).unwrap_or_else(|| value.to_string()),
            Body::Xml(root) => root
                .find("message")
                .map(|node| node.text.clone())
                .unwrap_or_default(),
            Body::Text(text) | Body::Raw(text) => text.clone(),
            Body::Binary(bytes) => format!("<{} bytes>", bytes.len()),
            Body::Empty => String::new(),
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status(), self.message())
    }
}

impl std::error::Error for ResponseError {}

fn json_error_message(value: &Value) -> Option<String> {
    let message = value.get("error")?.get("message")?;
    match message {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get("value").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
