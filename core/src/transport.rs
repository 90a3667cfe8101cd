//! Contract with the transport collaborator.
//!
//! The core never opens a socket. A `BatchTransport` executes the single
//! `$batch` POST, supplies the current csrf token, and owns the counter used
//! to correlate log lines of one submission.

use async_trait::async_trait;

use crate::error::BatchError;
use crate::http::{HttpRequest, HttpResponse};

#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Execute one HTTP request. Status codes >= 400 are returned as data;
    /// only network level failures are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BatchError>;

    /// Current csrf token. `None` omits the header entirely.
    async fn csrf_token(&self) -> Option<String> {
        None
    }

    /// Opaque id attached to the tracing span of one submission.
    fn correlation_id(&self) -> u64 {
        0
    }
}
