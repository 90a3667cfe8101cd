//! Atomic group of write requests nested inside a batch.
//!
//! # Design
//! A changeset is a multipart document embedded as a single part of its
//! batch, with its own `changeset_` boundary. Sub-responses are matched to
//! requests by position only. When the server rolls the whole changeset back
//! it answers with one plain error response instead of a nested multipart
//! body; that single settlement then stands in for every request.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::boundary::{skip_blank_lines, split_head, split_parts, BoundaryContainer, BoundaryId, BoundaryKind};
use crate::error::BatchError;
use crate::headers::multipart_boundary;
use crate::request::{Request, RequestOutcome};
use crate::response::{Response, Settlement};
use crate::response_type::ResponseType;

#[derive(Debug)]
pub struct ChangeSet {
    id: BoundaryId,
    requests: Vec<Request>,
    committed: bool,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            id: BoundaryId::generate(),
            requests: Vec::new(),
            committed: false,
        }
    }

    /// Append a request and return its outcome handle.
    pub fn add(&mut self, request: Request) -> Result<RequestOutcome, BatchError> {
        let outcome = request.outcome();
        self.add_item(request)?;
        Ok(outcome)
    }

    /// Append a request under the next free Content-ID, returned with its
    /// outcome so later requests can reference it as `$id`.
    pub fn add_numbered(&mut self, mut request: Request) -> Result<(u32, RequestOutcome), BatchError> {
        let content_id = self.next_content_id();
        request.set_content_id(content_id);
        Ok((content_id, self.add(request)?))
    }

    /// Seal the changeset. Irreversible.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Smallest Content-ID not yet used by a request in this changeset.
    pub fn next_content_id(&self) -> u32 {
        self.requests
            .iter()
            .filter_map(Request::content_id)
            .max()
            .map_or(1, |max| max + 1)
    }

    pub fn outcomes(&self) -> Vec<RequestOutcome> {
        self.requests.iter().map(Request::outcome).collect()
    }

    /// Serialize as one part of the enclosing batch: the multipart content
    /// type line followed by the nested, delimited request parts.
    pub fn serialize(&self, csrf_token: Option<&str>) -> Result<String, BatchError> {
        let boundary = self.boundary();
        let mut out = format!("Content-Type: {}\r\n\r\n", self.content_type());
        for request in &self.requests {
            out.push_str(&format!("--{boundary}\r\n"));
            out.push_str(&request.serialize(csrf_token)?);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{boundary}--\r\n"));
        Ok(out)
    }

    /// Distribute the raw bytes of this changeset's sub-response.
    pub fn dispatch(&mut self, part: &[u8]) -> Vec<RequestOutcome> {
        let (head, _) = split_head(skip_blank_lines(part));
        let nested = String::from_utf8_lossy(head).lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-type") {
                multipart_boundary(value)
            } else {
                None
            }
        });

        match nested {
            Some(boundary) => self.dispatch_parts(part, &boundary),
            None => {
                debug!(changeset = %self.id, "changeset answered with a single response");
                let response_type = self
                    .requests
                    .first()
                    .map_or(ResponseType::Value, Request::response_type);
                let settlement = Response::parse(part, response_type).map(Response::settle);
                self.settle_all(settlement);
            }
        }
        self.outcomes()
    }

    /// Wait until every request of this changeset has settled.
    pub async fn settled(&self) -> Vec<Settlement> {
        join_all(self.outcomes()).await
    }

    fn dispatch_parts(&mut self, body: &[u8], boundary: &str) {
        let parts = split_parts(body, boundary);
        if parts.len() < self.requests.len() {
            warn!(
                changeset = %self.id,
                expected = self.requests.len(),
                found = parts.len(),
                "changeset response is missing parts"
            );
            self.settle_all(Err(BatchError::PartCountMismatch {
                expected: self.requests.len(),
                found: parts.len(),
            }));
            return;
        }
        if parts.len() > self.requests.len() {
            warn!(changeset = %self.id, extra = parts.len() - self.requests.len(), "ignoring extra changeset parts");
        }
        for (request, part) in self.requests.iter_mut().zip(parts) {
            request.dispatch(part);
        }
    }

    fn settle_all(&mut self, settlement: Settlement) {
        for request in &mut self.requests {
            request.settle(settlement.clone());
        }
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryContainer for ChangeSet {
    type Item = Request;

    const KIND: BoundaryKind = BoundaryKind::ChangeSet;

    fn id(&self) -> &BoundaryId {
        &self.id
    }

    fn add_item(&mut self, item: Request) -> Result<usize, BatchError> {
        if self.committed {
            return Err(BatchError::ChangeSetCommitted(self.boundary()));
        }
        self.requests.push(item);
        Ok(self.requests.len() - 1)
    }
}
