//! OData `$batch` wire-protocol engine.
//!
//! # Overview
//! Encodes many logical HTTP operations into one `multipart/mixed` request
//! and decodes the server's `multipart/mixed` reply back into one settlement
//! per operation. The network round trip is performed by a `BatchTransport`
//! supplied by the host (host-does-IO pattern); the engine itself is
//! synchronous apart from awaiting outcomes.
//!
//! # Design
//! - `Batch` holds top-level `Request`s and `ChangeSet`s; a changeset is an
//!   atomic group of writes with its own nested boundary.
//! - Every `Request` owns one outcome channel. Callers await a
//!   `RequestOutcome`; the batch settles it while dispatching the response.
//! - An HTTP error status settles as `Outcome::Failed`, a value. Only framing
//!   or parser failures are `Err`, so one failed operation never aborts the
//!   aggregate wait of its batch.
//! - Sub-responses are matched to requests by position.

pub mod batch;
pub mod boundary;
pub mod changeset;
pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod http;
pub mod manager;
pub mod request;
pub mod response;
pub mod response_type;
pub mod transport;
pub mod xml;

pub use batch::{Batch, BatchItem, ItemKey, ItemOutcome};
pub use boundary::{BoundaryContainer, BoundaryId, BoundaryKind};
pub use changeset::ChangeSet;
pub use client::{BatchClient, BatchEnvelope, BatchReply};
pub use config::{ClientConfig, ODataVersion};
pub use error::{BatchError, ResponseError};
pub use headers::Headers;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use manager::{BatchId, BatchManager};
pub use request::{Request, RequestId, RequestOutcome};
pub use response::{Body, Outcome, PlainValue, Response, Settlement};
pub use response_type::{ResponseShape, ResponseType};
pub use transport::BatchTransport;
