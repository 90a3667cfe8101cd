//! Parsing of one embedded sub-response and its settlement.
//!
//! # Design
//! A sub-response arrives as the raw bytes of one MIME part:
//!
//! ```text
//! Content-Type: application/http
//! Content-Transfer-Encoding: binary
//!
//! HTTP/1.1 201 Created
//! Content-Type: application/json
//!
//! {"d":{"ID":7}}
//! ```
//!
//! `Response::parse` reads the optional MIME part headers, the status line,
//! the embedded headers and the body. Parsing either fails outright (a hard
//! `BatchError`) or produces a `Response`, which `settle` turns into an
//! `Outcome`. An HTTP status >= 400 is *not* an error at this layer: it
//! settles as `Outcome::Failed`, a value carrying the response.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::boundary::{skip_blank_lines, split_head};
use crate::error::{BatchError, ResponseError};
use crate::headers::Headers;
use crate::response_type::ResponseType;
use crate::xml::{self, XmlNode};

/// Body of a sub-response, shaped by its `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Xml(XmlNode),
    Text(String),
    Binary(Bytes),
    /// Missing or unrecognised content type.
    Raw(String),
}

/// One parsed embedded HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: String,
    headers: Headers,
    content_id: Option<String>,
    body: Body,
    response_type: ResponseType,
}

impl Response {
    /// Parse one MIME part holding an `application/http` message.
    ///
    /// The body is the exact byte range after the embedded header block.
    pub fn parse(part: &[u8], response_type: ResponseType) -> Result<Self, BatchError> {
        let mut rest = skip_blank_lines(part);

        let mut content_id = None;
        if !rest.starts_with(b"HTTP/") {
            let (head, body) = split_head(rest);
            let part_headers = parse_headers(head)?;
            content_id = part_headers.get("content-id").map(str::to_string);
            rest = skip_blank_lines(body);
        }

        let (head, body) = split_head(rest);
        let head = std::str::from_utf8(head)
            .map_err(|_| BatchError::MalformedResponse("header block is not UTF-8".to_string()))?;
        let mut head_lines = head.lines();
        let status_line = head_lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| BatchError::MalformedResponse("missing status line".to_string()))?;
        let (status, reason) = parse_status_line(status_line)?;

        let headers = Headers::parse_lines(head_lines).map_err(BatchError::MalformedResponse)?;
        let body = parse_body(headers.get("content-type"), body)?;

        Ok(Self {
            status,
            reason,
            headers,
            content_id,
            body,
            response_type,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `Content-ID` of the enclosing MIME part, when the server echoed one.
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Settle into an outcome value. Never fails.
    pub fn settle(self) -> Outcome {
        let response = Arc::new(self);
        if response.is_success() {
            Outcome::Success(response)
        } else {
            Outcome::Failed(ResponseError::new(response))
        }
    }

    /// Extract the plain result selected by the response type.
    ///
    /// `list_path` and `instance_path` are dot separated JSON paths (`d.results`,
    /// `d`, `value`; empty means the document root). When the body does not
    /// have the expected shape the response itself is returned.
    pub fn plain(self: Arc<Self>, list_path: &str, instance_path: &str) -> PlainValue {
        let extracted = match (self.response_type, &self.body) {
            (ResponseType::Count, Body::Text(text) | Body::Raw(text)) => {
                text.trim().parse().ok().map(PlainValue::Count)
            }
            (ResponseType::Count, Body::Json(value)) => value.as_u64().map(PlainValue::Count),
            (ResponseType::List, Body::Json(value)) => json_path(value, list_path)
                .or_else(|| Some(value))
                .and_then(Value::as_array)
                .map(|items| PlainValue::List(items.clone())),
            (ResponseType::Entity, Body::Json(value)) => json_path(value, instance_path)
                .filter(|entity| entity.is_object())
                .map(|entity| PlainValue::Entity(entity.clone())),
            (response_type, body) if response_type.is_stream() => match body {
                Body::Binary(bytes) => Some(PlainValue::Binary(bytes.clone())),
                Body::Text(text) | Body::Raw(text) => Some(PlainValue::Binary(Bytes::from(text.clone()))),
                _ => None,
            },
            (ResponseType::Value, body) => match body {
                Body::Binary(bytes) => Some(PlainValue::Binary(bytes.clone())),
                Body::Text(text) | Body::Raw(text) => Some(PlainValue::Text(text.clone())),
                Body::Json(value) => Some(PlainValue::Entity(value.clone())),
                _ => None,
            },
            _ => None,
        };
        extracted.unwrap_or(PlainValue::Response(self))
    }
}

/// Result of one sub-operation. Both variants are values; see `Settlement`.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Status < 400.
    Success(Arc<Response>),
    /// Status >= 400, with the response attached.
    Failed(ResponseError),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn response(&self) -> &Arc<Response> {
        match self {
            Outcome::Success(response) => response,
            Outcome::Failed(error) => error.response(),
        }
    }

    pub fn status(&self) -> u16 {
        self.response().status()
    }

    /// Plain result, or the HTTP failure as an error.
    pub fn plain(&self, list_path: &str, instance_path: &str) -> Result<PlainValue, BatchError> {
        match self {
            Outcome::Success(response) => Ok(Arc::clone(response).plain(list_path, instance_path)),
            Outcome::Failed(error) => Err(BatchError::Http(error.clone())),
        }
    }
}

/// Final value of one request's outcome. `Err` only for parser failures.
pub type Settlement = Result<Outcome, BatchError>;

/// Caller facing result of one operation in non-raw mode.
#[derive(Debug, Clone)]
pub enum PlainValue {
    Count(u64),
    List(Vec<Value>),
    Entity(Value),
    Text(String),
    Binary(Bytes),
    /// No shape matched; the full response.
    Response(Arc<Response>),
}

fn parse_headers(head: &[u8]) -> Result<Headers, BatchError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| BatchError::MalformedResponse("part headers are not UTF-8".to_string()))?;
    Headers::parse_lines(head.lines().filter(|line| !line.trim().is_empty())).map_err(BatchError::MalformedResponse)
}

fn parse_status_line(line: &str) -> Result<(u16, String), BatchError> {
    let malformed = || BatchError::MalformedResponse(format!("invalid status line: {line:?}"));
    let mut fields = line.trim().splitn(3, ' ');
    let version = fields.next().ok_or_else(malformed)?;
    if !version.starts_with("HTTP/") {
        return Err(malformed());
    }
    let status = fields
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..600).contains(code))
        .ok_or_else(malformed)?;
    let reason = fields.next().unwrap_or_default().to_string();
    Ok((status, reason))
}

fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Body, BatchError> {
    let media_type = content_type
        .and_then(|value| value.split(';').next())
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if body.is_empty() || (!is_binary(&media_type) && body.trim_ascii().is_empty()) {
        return Ok(Body::Empty);
    }
    if content_type.is_none() {
        return Ok(text_or_binary(body, Body::Raw));
    }

    if media_type.ends_with("json") {
        serde_json::from_slice(body)
            .map(Body::Json)
            .map_err(|e| BatchError::MalformedResponse(format!("invalid JSON body: {e}")))
    } else if media_type.ends_with("xml") {
        std::str::from_utf8(body)
            .map_err(|e| e.to_string())
            .and_then(xml::parse)
            .map(Body::Xml)
            .map_err(|e| BatchError::MalformedResponse(format!("invalid XML body: {e}")))
    } else if media_type.starts_with("text/") {
        Ok(text_or_binary(body, Body::Text))
    } else if is_binary(&media_type) {
        Ok(Body::Binary(Bytes::copy_from_slice(body)))
    } else {
        Ok(text_or_binary(body, Body::Raw))
    }
}

/// Text bodies that are not valid UTF-8 are kept as bytes.
fn text_or_binary(body: &[u8], text: fn(String) -> Body) -> Body {
    match std::str::from_utf8(body) {
        Ok(valid) => text(valid.to_string()),
        Err(_) => Body::Binary(Bytes::copy_from_slice(body)),
    }
}

fn is_binary(media_type: &str) -> bool {
    media_type == "application/octet-stream"
        || media_type == "application/pdf"
        || ["image/", "audio/", "video/"]
            .iter()
            .any(|prefix| media_type.starts_with(prefix))
}

fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}
