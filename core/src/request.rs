//! One pending sub-operation of a batch.
//!
//! # Design
//! A `Request` is built synchronously and owns exactly one outcome channel,
//! created with the request. Callers hold a `RequestOutcome` (a shared
//! receiver) and await it independently of the batch; the batch settles the
//! sender when the matching sub-response has been parsed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BatchError;
use crate::http::HttpMethod;
use crate::response::{Response, Settlement};
use crate::response_type::ResponseType;

/// Identity of a request inside its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Awaitable settlement of one request.
///
/// Resolves to `BatchError::Abandoned` if the request is dropped unsettled.
#[derive(Clone)]
pub struct RequestOutcome {
    inner: Shared<oneshot::Receiver<Settlement>>,
}

impl RequestOutcome {
    /// The settlement, if it already happened.
    pub fn peek(&self) -> Option<Settlement> {
        // Shared only records its output once polled, so poll a clone.
        self.inner
            .clone()
            .now_or_never()
            .map(|received| received.unwrap_or(Err(BatchError::Abandoned)))
    }

    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }
}

impl Future for RequestOutcome {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner
            .poll_unpin(cx)
            .map(|received| received.unwrap_or(Err(BatchError::Abandoned)))
    }
}

impl fmt::Debug for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOutcome")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// An embedded HTTP request awaiting its sub-response.
pub struct Request {
    id: RequestId,
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    content_id: Option<u32>,
    response_type: ResponseType,
    sender: Option<oneshot::Sender<Settlement>>,
    outcome: RequestOutcome,
}

impl Request {
    /// `url` is relative to the service root, e.g. `Products(1)`.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            id: RequestId::new(),
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            content_id: None,
            response_type: ResponseType::Value,
            sender: Some(sender),
            outcome: RequestOutcome {
                inner: receiver.shared(),
            },
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, BatchError> {
        let value = serde_json::to_value(body).map_err(|e| BatchError::SerializationError(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_content_id(mut self, content_id: u32) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn content_id(&self) -> Option<u32> {
        self.content_id
    }

    pub(crate) fn set_content_id(&mut self, content_id: u32) {
        self.content_id = Some(content_id);
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn set_response_type(&mut self, response_type: ResponseType) {
        self.response_type = response_type;
    }

    /// A handle that resolves when this request settles.
    pub fn outcome(&self) -> RequestOutcome {
        self.outcome.clone()
    }

    /// Serialize as one `application/http` MIME part.
    ///
    /// Without a body the csrf token goes into the part headers; with a body
    /// it is merged into the embedded HTTP headers next to `Content-Length`.
    /// Computed values replace caller headers of the same name.
    pub fn serialize(&self, csrf_token: Option<&str>) -> Result<String, BatchError> {
        let body = self.serialized_body()?;
        let mut out = String::new();

        push_line(&mut out, "Content-Type: application/http");
        if let Some(content_id) = self.content_id {
            push_line(&mut out, &format!("Content-ID: {content_id}"));
        }
        if body.is_none() {
            if let Some(token) = csrf_token {
                push_line(&mut out, &format!("x-csrf-token: {token}"));
            }
        }
        push_line(&mut out, "Content-Transfer-Encoding: binary");
        push_line(&mut out, "");
        push_line(&mut out, &format!("{} {} HTTP/1.1", self.method, self.url));

        for (name, value) in &self.headers {
            if body.is_some() && is_computed(name, csrf_token.is_some()) {
                continue;
            }
            push_line(&mut out, &format!("{name}: {value}"));
        }
        if let Some(body) = &body {
            if !self.has_header("content-type") {
                push_line(&mut out, "Content-Type: application/json");
            }
            push_line(&mut out, &format!("Content-Length: {}", body.len()));
            if let Some(token) = csrf_token {
                push_line(&mut out, &format!("x-csrf-token: {token}"));
            }
        }
        push_line(&mut out, "");
        if let Some(body) = body {
            out.push_str(&body);
        }
        Ok(out)
    }

    /// Parse the raw bytes of this request's sub-response and settle.
    pub fn dispatch(&mut self, part: &[u8]) -> RequestOutcome {
        let settlement = match Response::parse(part, self.response_type) {
            Ok(response) => Ok(response.settle()),
            Err(err) => {
                warn!(url = %self.url, error = %err, "malformed sub-response");
                Err(err)
            }
        };
        self.settle(settlement);
        self.outcome()
    }

    /// Complete the outcome. Later calls are ignored.
    pub(crate) fn settle(&mut self, settlement: Settlement) {
        match self.sender.take() {
            Some(sender) => {
                debug!(method = %self.method, url = %self.url, "request settled");
                // The request keeps its own receiver alive, so this cannot fail.
                let _ = sender.send(settlement);
            }
            None => debug!(url = %self.url, "request already settled"),
        }
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    fn serialized_body(&self) -> Result<Option<String>, BatchError> {
        let Some(body) = &self.body else {
            return Ok(None);
        };
        if let Some((_, content_type)) = self
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        {
            if !content_type.to_ascii_lowercase().contains("json") {
                return Err(BatchError::UnsupportedBody(content_type.clone()));
            }
        }
        serde_json::to_string(body)
            .map(Some)
            .map_err(|e| BatchError::SerializationError(e.to_string()))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content_id", &self.content_id)
            .field("response_type", &self.response_type)
            .field("settled", &self.outcome.is_settled())
            .finish()
    }
}

/// Headers `serialize` writes itself when a body is present.
fn is_computed(name: &str, has_token: bool) -> bool {
    name.eq_ignore_ascii_case("content-length") || (has_token && name.eq_ignore_ascii_case("x-csrf-token"))
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::response::Outcome;

    #[test]
    fn serialize_get_places_token_in_part_headers() {
        let req = Request::new(HttpMethod::Get, "Products(1)").header("Accept", "application/json");
        let text = req.serialize(Some("tok")).unwrap();
        assert_eq!(
            text,
            "Content-Type: application/http\r\n\
             x-csrf-token: tok\r\n\
             Content-Transfer-Encoding: binary\r\n\
             \r\n\
             GET Products(1) HTTP/1.1\r\n\
             Accept: application/json\r\n\
             \r\n"
        );
    }

    #[test]
    fn serialize_with_body_merges_length_and_token() {
        let req = Request::new(HttpMethod::Post, "Products")
            .with_content_id(1)
            .json(&json!({"Name": "Milk"}))
            .unwrap();
        let text = req.serialize(Some("tok")).unwrap();
        let body = r#"{"Name":"Milk"}"#;
        assert_eq!(
            text,
            format!(
                "Content-Type: application/http\r\n\
                 Content-ID: 1\r\n\
                 Content-Transfer-Encoding: binary\r\n\
                 \r\n\
                 POST Products HTTP/1.1\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 x-csrf-token: tok\r\n\
                 \r\n\
                 {body}",
                body.len()
            )
        );
    }

    #[test]
    fn serialize_replaces_caller_length_and_token() {
        let req = Request::new(HttpMethod::Post, "Products")
            .header("Content-Length", "999")
            .header("X-CSRF-Token", "stale")
            .header("Accept", "application/json")
            .json(&json!({"Name": "Milk"}))
            .unwrap();
        let text = req.serialize(Some("fresh")).unwrap();
        let lower = text.to_ascii_lowercase();
        assert_eq!(lower.matches("content-length:").count(), 1);
        assert_eq!(lower.matches("x-csrf-token:").count(), 1);
        assert!(text.contains(&format!("Content-Length: {}\r\n", r#"{"Name":"Milk"}"#.len())));
        assert!(text.contains("x-csrf-token: fresh\r\n"));
        assert!(!text.contains("stale"));
        assert!(text.contains("Accept: application/json\r\n"));
    }

    #[test]
    fn caller_token_is_kept_without_a_fresh_one() {
        let req = Request::new(HttpMethod::Post, "Products")
            .header("x-csrf-token", "caller")
            .json(&json!({"Name": "Milk"}))
            .unwrap();
        let text = req.serialize(None).unwrap();
        assert_eq!(text.matches("x-csrf-token: caller\r\n").count(), 1);
    }

    #[test]
    fn serialize_without_token_omits_header() {
        let req = Request::new(HttpMethod::Delete, "Products(1)");
        let text = req.serialize(None).unwrap();
        assert!(!text.to_ascii_lowercase().contains("x-csrf-token"));
    }

    #[test]
    fn non_json_body_is_rejected() {
        let req = Request::new(HttpMethod::Put, "Images(1)/$value")
            .header("Content-Type", "image/png")
            .json(&json!("data"))
            .unwrap();
        let err = req.serialize(None).unwrap_err();
        assert!(matches!(err, BatchError::UnsupportedBody(ct) if ct == "image/png"));
    }

    #[test]
    fn dispatch_settles_outcome() {
        let mut req = Request::new(HttpMethod::Get, "Products(1)").with_response_type(ResponseType::Entity);
        let outcome = req.outcome();
        assert!(!outcome.is_settled());
        req.dispatch(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"d\":{\"ID\":1}}");
        let settled = outcome.peek().unwrap().unwrap();
        assert!(matches!(settled, Outcome::Success(ref r) if r.status() == 200));
    }

    #[test]
    fn dispatch_with_broken_framing_settles_hard_failure() {
        let mut req = Request::new(HttpMethod::Get, "Products(1)");
        let outcome = req.dispatch(b"not an http message\r\n");
        assert!(matches!(outcome.peek(), Some(Err(BatchError::MalformedResponse(_)))));
    }

    #[test]
    fn second_settlement_is_ignored() {
        let mut req = Request::new(HttpMethod::Get, "Products(1)");
        req.settle(Err(BatchError::Abandoned));
        req.dispatch(b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(matches!(req.outcome().peek(), Some(Err(BatchError::Abandoned))));
    }

    #[tokio::test]
    async fn dropped_request_resolves_abandoned() {
        let req = Request::new(HttpMethod::Get, "Products");
        let outcome = req.outcome();
        drop(req);
        assert!(matches!(outcome.await, Err(BatchError::Abandoned)));
    }
}
