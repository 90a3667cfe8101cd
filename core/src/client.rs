//! Request builders and batch submission.
//!
//! # Design
//! `BatchClient` holds only its `ClientConfig`. Request builders produce
//! `Request` values whose path and response type derive from the same
//! `ResponseShape`, so the generated URL and the later body extraction agree.
//! `build_batch_request` turns a populated `Batch` into the outer `HttpRequest`;
//! `submit` runs the whole round trip through a `BatchTransport`.

use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::batch::{Batch, ItemOutcome};
use crate::boundary::BoundaryContainer;
use crate::config::{ClientConfig, ODataVersion};
use crate::error::BatchError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::manager::{BatchId, BatchManager};
use crate::request::Request;
use crate::response::PlainValue;
use crate::response_type::{ResponseShape, ResponseType};
use crate::transport::BatchTransport;

/// Full parsed reply, returned in raw mode.
#[derive(Debug, Clone)]
pub struct BatchEnvelope {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub outcomes: Vec<ItemOutcome>,
}

#[derive(Debug, Clone)]
pub enum BatchReply {
    /// One entry per request, changesets expanded, in declaration order.
    Plain(Vec<Result<PlainValue, BatchError>>),
    Raw(BatchEnvelope),
}

#[derive(Debug, Clone)]
pub struct BatchClient {
    config: ClientConfig,
}

impl BatchClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a request for `resource` whose path follows `shape`.
    pub fn build_request(&self, method: HttpMethod, resource: &str, shape: ResponseShape) -> Request {
        let response_type = ResponseType::resolve(shape);
        let path = response_type.path(resource, self.config.page_size);
        let mut request = Request::new(method, path).with_response_type(response_type);
        if matches!(response_type, ResponseType::List | ResponseType::Entity) {
            request = request.header("Accept", "application/json");
        }
        self.versioned(request)
    }

    pub fn list(&self, resource: &str) -> Request {
        self.build_request(HttpMethod::Get, resource, shape(|s| s.is_list = true))
    }

    pub fn entity(&self, resource: &str) -> Request {
        self.build_request(HttpMethod::Get, resource, shape(|s| s.is_entity = true))
    }

    pub fn count(&self, resource: &str) -> Request {
        self.build_request(HttpMethod::Get, resource, shape(|s| s.is_count = true))
    }

    /// Raw value of a property or media resource.
    pub fn value(&self, resource: &str) -> Request {
        self.build_request(HttpMethod::Get, resource, ResponseShape::default())
    }

    /// Binary content of a media entity.
    pub fn stream(&self, resource: &str) -> Request {
        self.build_request(
            HttpMethod::Get,
            resource,
            shape(|s| {
                s.is_entity = true;
                s.has_stream = true;
            }),
        )
    }

    pub fn create<T: Serialize>(&self, entity_set: &str, body: &T) -> Result<Request, BatchError> {
        self.build_request(HttpMethod::Post, entity_set, shape(|s| s.is_entity = true))
            .json(body)
    }

    /// Full replacement (`PUT`).
    pub fn update<T: Serialize>(&self, resource: &str, body: &T) -> Result<Request, BatchError> {
        self.build_request(HttpMethod::Put, resource, shape(|s| s.is_entity = true))
            .json(body)
    }

    /// Partial update: `MERGE` on V2, `PATCH` on V4.
    pub fn merge<T: Serialize>(&self, resource: &str, body: &T) -> Result<Request, BatchError> {
        let method = match self.config.version {
            ODataVersion::V2 => HttpMethod::Merge,
            ODataVersion::V4 => HttpMethod::Patch,
        };
        self.build_request(method, resource, shape(|s| s.is_entity = true))
            .json(body)
    }

    /// Delete addresses the entity itself, never its `$value`.
    pub fn delete(&self, resource: &str) -> Request {
        self.versioned(Request::new(HttpMethod::Delete, resource))
    }

    /// The outer `$batch` POST for `batch`.
    pub fn build_batch_request(&self, batch: &Batch, csrf_token: Option<&str>) -> Result<HttpRequest, BatchError> {
        let body = batch.serialize(csrf_token)?;
        let mut headers = vec![
            ("Content-Type".to_string(), batch.content_type()),
            ("Accept".to_string(), "multipart/mixed".to_string()),
        ];
        for (name, value) in self.config.version.version_headers() {
            headers.push((name.to_string(), value.to_string()));
        }
        if let Some(token) = csrf_token {
            headers.push(("x-csrf-token".to_string(), token.to_string()));
        }
        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}/$batch", self.config.service_root),
            headers,
            body: Some(body),
        })
    }

    /// Serialize, send and dispatch the batch `id`, then unregister it.
    ///
    /// On a transport failure the batch stays registered and nothing settles.
    pub async fn submit<T>(&self, manager: &mut BatchManager, id: &BatchId, transport: &T) -> Result<BatchReply, BatchError>
    where
        T: BatchTransport + ?Sized,
    {
        let span = info_span!("batch", correlation = transport.correlation_id(), batch = %id);
        async move {
            let csrf_token = transport.csrf_token().await;
            let request = self.build_batch_request(manager.batch_mut(id)?, csrf_token.as_deref())?;
            let response = transport.send(request).await?;
            info!(status = response.status, bytes = response.body.len(), "batch response received");

            let dispatched = manager.batch_mut(id)?.dispatch(&response).await;
            manager.remove(id);
            Ok(self.reply(response, dispatched?))
        }
        .instrument(span)
        .await
    }

    fn versioned(&self, mut request: Request) -> Request {
        for (name, value) in self.config.version.version_headers() {
            request = request.header(name, value);
        }
        request
    }

    fn reply(&self, response: HttpResponse, outcomes: Vec<ItemOutcome>) -> BatchReply {
        if self.config.raw {
            return BatchReply::Raw(BatchEnvelope {
                status: response.status,
                headers: response.headers,
                outcomes,
            });
        }
        let list_path = self.config.version.list_result_path();
        let instance_path = self.config.version.instance_result_path();
        let plain = outcomes
            .into_iter()
            .flat_map(ItemOutcome::into_settlements)
            .map(|settlement| settlement.and_then(|outcome| outcome.plain(list_path, instance_path)))
            .collect();
        BatchReply::Plain(plain)
    }
}

fn shape(set: impl FnOnce(&mut ResponseShape)) -> ResponseShape {
    let mut shape = ResponseShape::default();
    set(&mut shape);
    shape
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::changeset::ChangeSet;

    fn client() -> BatchClient {
        BatchClient::new(ClientConfig::new("http://localhost:3000/odata/").with_page_size(20))
    }

    /// Echoes a canned reply that reuses the request boundary.
    struct CannedTransport {
        parts: Vec<String>,
        token: Option<String>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl BatchTransport for CannedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BatchError> {
            let content_type = request
                .headers
                .iter()
                .find(|(k, _)| k == "Content-Type")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            let boundary = content_type.split("boundary=").nth(1).unwrap_or_default().to_string();
            self.sent.lock().unwrap().push(request);

            let mut body = String::new();
            for part in &self.parts {
                body.push_str(&format!("--{boundary}\r\n{part}"));
            }
            body.push_str(&format!("--{boundary}--\r\n"));
            Ok(HttpResponse {
                status: 202,
                headers: vec![("Content-Type".to_string(), content_type)],
                body: Bytes::from(body),
            })
        }

        async fn csrf_token(&self) -> Option<String> {
            self.token.clone()
        }

        fn correlation_id(&self) -> u64 {
            7
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl BatchTransport for FailingTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, BatchError> {
            Err(BatchError::Transport("connection refused".to_string()))
        }
    }

    /// Answers with a plain error page instead of a multipart reply.
    struct ErrorPageTransport;

    #[async_trait]
    impl BatchTransport for ErrorPageTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, BatchError> {
            Ok(HttpResponse {
                status: 503,
                headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
                body: Bytes::from_static(b"Service Unavailable"),
            })
        }
    }

    fn part(status: &str, content_type: &str, body: &str) -> String {
        format!("Content-Type: application/http\r\n\r\nHTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n\r\n{body}\r\n")
    }

    #[test]
    fn builders_derive_path_from_shape() {
        let c = client();
        let list = c.list("Products");
        assert_eq!(list.url(), "Products?$top=20");
        assert_eq!(list.response_type(), ResponseType::List);

        let count = c.count("Products");
        assert_eq!(count.url(), "Products/$count");
        assert_eq!(count.response_type(), ResponseType::Count);

        let stream = c.stream("Images(1)");
        assert_eq!(stream.url(), "Images(1)/$value");
        assert_eq!(stream.response_type(), ResponseType::EntityStream);

        let delete = c.delete("Products(1)");
        assert_eq!(delete.url(), "Products(1)");
        assert_eq!(delete.method(), HttpMethod::Delete);

        let entity = c.entity("Products(1)");
        assert_eq!(entity.url(), "Products(1)");
        assert!(entity.headers().iter().any(|(k, v)| k == "DataServiceVersion" && v == "2.0"));
    }

    #[test]
    fn merge_method_follows_version() {
        let v2 = client().merge("Products(1)", &json!({"Price": 3})).unwrap();
        assert_eq!(v2.method(), HttpMethod::Merge);

        let v4 = BatchClient::new(ClientConfig::new("http://h").with_version(ODataVersion::V4))
            .merge("Products(1)", &json!({"Price": 3}))
            .unwrap();
        assert_eq!(v4.method(), HttpMethod::Patch);
    }

    #[test]
    fn batch_request_carries_boundary_and_token() {
        let c = client();
        let mut batch = Batch::new();
        batch.add(c.entity("Products(1)"));

        let req = c.build_batch_request(&batch, Some("tok")).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:3000/odata/$batch");
        assert!(req.headers.contains(&("Content-Type".to_string(), batch.content_type())));
        assert!(req.headers.contains(&("Accept".to_string(), "multipart/mixed".to_string())));
        assert!(req.headers.contains(&("x-csrf-token".to_string(), "tok".to_string())));
        assert!(req.body.unwrap().starts_with(&format!("--{}\r\n", batch.boundary())));

        let without = c.build_batch_request(&batch, None).unwrap();
        assert!(!without.headers.iter().any(|(k, _)| k == "x-csrf-token"));
    }

    #[tokio::test]
    async fn submit_returns_plain_results_and_removes_batch() {
        let c = client();
        let mut manager = BatchManager::new();
        let id = manager.add();
        let batch = manager.batch_mut(&id).unwrap();
        batch.add(c.count("Products"));
        batch.add(c.entity("Products(9)"));
        batch.add(c.list("Products"));

        let transport = CannedTransport {
            parts: vec![
                part("200 OK", "text/plain", "3"),
                part("404 Not Found", "application/json", r#"{"error":{"message":{"value":"gone"}}}"#),
                part("200 OK", "application/json", r#"{"d":{"results":[{"ID":1},{"ID":2}]}}"#),
            ],
            token: Some("tok".to_string()),
            sent: Mutex::new(Vec::new()),
        };

        let BatchReply::Plain(results) = c.submit(&mut manager, &id, &transport).await.unwrap() else {
            panic!("expected plain reply");
        };
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Ok(PlainValue::Count(3))));
        match &results[1] {
            Err(BatchError::Http(error)) => assert_eq!(error.status(), 404),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&results[2], Ok(PlainValue::List(items)) if items.len() == 2));
        assert!(!manager.has(&id));

        let sent = transport.sent.lock().unwrap();
        assert!(sent[0].headers.contains(&("x-csrf-token".to_string(), "tok".to_string())));
    }

    #[tokio::test]
    async fn submit_in_raw_mode_returns_envelope() {
        let c = BatchClient::new(ClientConfig::new("http://h").with_raw(true));
        let mut manager = BatchManager::new();
        let id = manager.add();
        let mut changeset = ChangeSet::new();
        changeset.add(c.delete("Products(1)")).unwrap();
        changeset.add(c.delete("Products(2)")).unwrap();
        manager.batch_mut(&id).unwrap().add_change_set(changeset);

        let transport = CannedTransport {
            parts: vec![part("400 Bad Request", "application/json", r#"{"error":{"message":{"value":"no"}}}"#)],
            token: None,
            sent: Mutex::new(Vec::new()),
        };

        let BatchReply::Raw(envelope) = c.submit(&mut manager, &id, &transport).await.unwrap() else {
            panic!("expected raw reply");
        };
        assert_eq!(envelope.status, 202);
        assert_eq!(envelope.outcomes.len(), 1);
        let ItemOutcome::ChangeSet(settlements) = &envelope.outcomes[0] else {
            panic!("expected changeset outcome");
        };
        assert_eq!(settlements.len(), 2);
        assert!(settlements.iter().all(|s| matches!(s, Ok(o) if o.status() == 400)));
    }

    #[tokio::test]
    async fn transport_failure_keeps_batch_unsettled() {
        let c = client();
        let mut manager = BatchManager::new();
        let id = manager.add();
        let outcome = manager.batch_mut(&id).unwrap().add(c.entity("Products(1)"));

        let err = c.submit(&mut manager, &id, &FailingTransport).await.unwrap_err();
        assert!(matches!(err, BatchError::Transport(_)));
        assert!(manager.has(&id));
        assert!(!outcome.is_settled());
    }

    #[tokio::test]
    async fn reply_without_boundary_fails_and_removes_batch() {
        let c = client();
        let mut manager = BatchManager::new();
        let id = manager.add();
        let outcome = manager.batch_mut(&id).unwrap().add(c.entity("Products(1)"));

        let err = c.submit(&mut manager, &id, &ErrorPageTransport).await.unwrap_err();
        assert!(matches!(err, BatchError::BoundaryNotFound));
        assert!(!manager.has(&id));
        assert!(matches!(outcome.await, Err(BatchError::Abandoned)));
    }

    #[tokio::test]
    async fn submit_unknown_batch_fails() {
        let mut manager = BatchManager::new();
        let id = BatchId::generate();
        let err = client().submit(&mut manager, &id, &FailingTransport).await.unwrap_err();
        assert!(matches!(err, BatchError::BatchNotFound(_)));
    }
}
