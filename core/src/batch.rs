//! One `$batch` round trip: an ordered list of requests and changesets.
//!
//! # Design
//! The batch owns its items for their whole life. `serialize` produces the
//! outer multipart payload; `dispatch` splits the outer response by the
//! boundary the server announced and hands each part to the item at the same
//! position. Framing problems fail the whole dispatch before any item
//! settles; everything below framing is settled per item, so the aggregate
//! wait never short-circuits on one failed operation.
//!
//! Correlation is positional. Servers that reorder parts would misattribute
//! results; echoed `Content-ID`s are exposed on `Response` but not used here.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::boundary::{split_parts, BoundaryContainer, BoundaryId, BoundaryKind};
use crate::changeset::ChangeSet;
use crate::error::BatchError;
use crate::headers::multipart_boundary;
use crate::http::HttpResponse;
use crate::request::{Request, RequestId, RequestOutcome};
use crate::response::Settlement;

/// A top-level member of a batch.
#[derive(Debug)]
pub enum BatchItem {
    Request(Request),
    ChangeSet(ChangeSet),
}

impl BatchItem {
    pub fn key(&self) -> ItemKey {
        match self {
            BatchItem::Request(request) => ItemKey::Request(request.id()),
            BatchItem::ChangeSet(changeset) => ItemKey::ChangeSet(changeset.id().clone()),
        }
    }

    fn serialize(&self, csrf_token: Option<&str>) -> Result<String, BatchError> {
        match self {
            BatchItem::Request(request) => request.serialize(csrf_token),
            BatchItem::ChangeSet(changeset) => changeset.serialize(csrf_token),
        }
    }

    fn dispatch(&mut self, part: &[u8]) -> Vec<RequestOutcome> {
        match self {
            BatchItem::Request(request) => vec![request.dispatch(part)],
            BatchItem::ChangeSet(changeset) => changeset.dispatch(part),
        }
    }

    fn outcomes(&self) -> Vec<RequestOutcome> {
        match self {
            BatchItem::Request(request) => vec![request.outcome()],
            BatchItem::ChangeSet(changeset) => changeset.outcomes(),
        }
    }
}

/// Identity of a top-level item, used by `Batch::index_of`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Request(RequestId),
    ChangeSet(BoundaryId),
}

/// Settled result of one top-level item.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Request(Settlement),
    /// One settlement per request of the changeset, in order.
    ChangeSet(Vec<Settlement>),
}

impl ItemOutcome {
    /// True when any contained settlement is an HTTP error or a hard failure.
    pub fn is_error(&self) -> bool {
        let failed = |s: &Settlement| s.as_ref().map_or(true, |outcome| outcome.is_error());
        match self {
            ItemOutcome::Request(settlement) => failed(settlement),
            ItemOutcome::ChangeSet(settlements) => settlements.iter().any(failed),
        }
    }

    /// Flatten to one settlement per request.
    pub fn into_settlements(self) -> Vec<Settlement> {
        match self {
            ItemOutcome::Request(settlement) => vec![settlement],
            ItemOutcome::ChangeSet(settlements) => settlements,
        }
    }
}

#[derive(Debug)]
pub struct Batch {
    id: BoundaryId,
    items: Vec<BatchItem>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: BoundaryId::generate(),
            items: Vec::new(),
        }
    }

    /// Append a top-level request and return its outcome handle.
    pub fn add(&mut self, request: Request) -> RequestOutcome {
        let outcome = request.outcome();
        self.items.push(BatchItem::Request(request));
        outcome
    }

    /// Append a changeset and return its position.
    ///
    /// It stays reachable through `change_set_mut` and, while uncommitted,
    /// `default_change_set_mut`.
    pub fn add_change_set(&mut self, changeset: ChangeSet) -> usize {
        self.items.push(BatchItem::ChangeSet(changeset));
        self.items.len() - 1
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of requests including those nested in changesets.
    pub fn request_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                BatchItem::Request(_) => 1,
                BatchItem::ChangeSet(changeset) => changeset.len(),
            })
            .sum()
    }

    /// First changeset that is still open for requests.
    pub fn default_change_set(&self) -> Option<&ChangeSet> {
        self.items.iter().find_map(|item| match item {
            BatchItem::ChangeSet(changeset) if !changeset.is_committed() => Some(changeset),
            _ => None,
        })
    }

    pub fn default_change_set_mut(&mut self) -> Option<&mut ChangeSet> {
        self.items.iter_mut().find_map(|item| match item {
            BatchItem::ChangeSet(changeset) if !changeset.is_committed() => Some(changeset),
            _ => None,
        })
    }

    pub fn change_set_mut(&mut self, id: &BoundaryId) -> Option<&mut ChangeSet> {
        self.items.iter_mut().find_map(|item| match item {
            BatchItem::ChangeSet(changeset) if changeset.id() == id => Some(changeset),
            _ => None,
        })
    }

    /// Position of a top-level item. Requests inside changesets are not searched.
    pub fn index_of(&self, key: &ItemKey) -> Option<usize> {
        self.items.iter().position(|item| item.key() == *key)
    }

    /// Outcome handles of every request, flattened in declaration order.
    pub fn outcomes(&self) -> Vec<RequestOutcome> {
        self.items.iter().flat_map(BatchItem::outcomes).collect()
    }

    /// Build the outer multipart payload.
    pub fn serialize(&self, csrf_token: Option<&str>) -> Result<String, BatchError> {
        let boundary = self.boundary();
        let mut out = String::new();
        for item in &self.items {
            out.push_str(&format!("--{boundary}\r\n"));
            out.push_str(&item.serialize(csrf_token)?);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{boundary}--\r\n"));
        debug!(%boundary, items = self.items.len(), bytes = out.len(), "serialized batch");
        Ok(out)
    }

    /// Boundary announced by the outer response's `Content-Type`.
    pub fn boundary_from_response(headers: &[(String, String)]) -> Result<String, BatchError> {
        headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .find_map(|(_, value)| multipart_boundary(value))
            .ok_or(BatchError::BoundaryNotFound)
    }

    /// Split the outer response into per-item parts, settle every request,
    /// and wait until all of them have settled.
    pub async fn dispatch(&mut self, response: &HttpResponse) -> Result<Vec<ItemOutcome>, BatchError> {
        let boundary = Self::boundary_from_response(&response.headers).inspect_err(|_| {
            warn!(status = response.status, "batch response carries no multipart boundary");
        })?;
        self.dispatch_body(&boundary, &response.body).await
    }

    /// Like `dispatch`, with the boundary already known.
    pub async fn dispatch_body(&mut self, boundary: &str, body: &[u8]) -> Result<Vec<ItemOutcome>, BatchError> {
        let parts = split_parts(body, boundary);
        if parts.len() < self.items.len() {
            return Err(BatchError::PartCountMismatch {
                expected: self.items.len(),
                found: parts.len(),
            });
        }
        if parts.len() > self.items.len() {
            warn!(%boundary, extra = parts.len() - self.items.len(), "ignoring extra batch parts");
        }

        let mut pending = Vec::with_capacity(self.items.len());
        for (index, (item, part)) in self.items.iter_mut().zip(parts).enumerate() {
            debug!(%boundary, index, bytes = part.len(), "dispatching part");
            let is_change_set = matches!(item, BatchItem::ChangeSet(_));
            pending.push((is_change_set, item.dispatch(part)));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (is_change_set, handles) in pending {
            let mut settlements = join_all(handles).await;
            outcomes.push(if is_change_set {
                ItemOutcome::ChangeSet(settlements)
            } else {
                match settlements.pop() {
                    Some(settlement) => ItemOutcome::Request(settlement),
                    None => ItemOutcome::Request(Err(BatchError::Abandoned)),
                }
            });
        }
        Ok(outcomes)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryContainer for Batch {
    type Item = BatchItem;

    const KIND: BoundaryKind = BoundaryKind::Batch;

    fn id(&self) -> &BoundaryId {
        &self.id
    }

    fn add_item(&mut self, item: BatchItem) -> Result<usize, BatchError> {
        self.items.push(item);
        Ok(self.items.len() - 1)
    }
}
