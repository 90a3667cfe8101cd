//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! The outer `$batch` call is described as plain data. The core builds one
//! `HttpRequest` per batch and parses the matching `HttpResponse`; the
//! transport collaborator executes the round trip. Embedded sub-requests use
//! the same `HttpMethod` so both layers agree on method spelling.

use std::fmt;

use bytes::Bytes;

/// HTTP method for a request or an embedded sub-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    /// OData V2 partial update.
    Merge,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Merge => "MERGE",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outer `$batch` request described as plain data.
///
/// Built by `BatchClient::build_batch_request`. The transport executes it and
/// hands the corresponding `HttpResponse` back to `Batch::dispatch`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// The outer `$batch` response described as plain data.
///
/// The body stays raw bytes so embedded binary parts are not altered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}
