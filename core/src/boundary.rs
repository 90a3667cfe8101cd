//! Boundary ids and the multipart framing shared by batches and changesets.
//!
//! # Design
//! `Batch` and `ChangeSet` are both boundary-delimited containers. Instead of
//! a common base type they implement `BoundaryContainer`, which carries the id,
//! the derived boundary string and the append operation. `BatchManager` only
//! needs the id, so it uses `BoundaryId` directly.
//!
//! Framing works on raw bytes. Part bodies reach the parser exactly as sent;
//! only the line break owned by the next delimiter is removed.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::BatchError;

/// Which kind of container a boundary delimits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    Batch,
    ChangeSet,
}

impl BoundaryKind {
    fn prefix(&self) -> &'static str {
        match self {
            BoundaryKind::Batch => "batch_",
            BoundaryKind::ChangeSet => "changeset_",
        }
    }
}

/// Twelve lowercase hex digits grouped as `xxxx-xxxx-xxxx`, generated from
/// six bytes of OS randomness. Collisions are not checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundaryId(String);

impl BoundaryId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 6];
        OsRng.fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `batch_xxxx-xxxx-xxxx` or `changeset_xxxx-xxxx-xxxx`.
    pub fn boundary(&self, kind: BoundaryKind) -> String {
        format!("{}{}", kind.prefix(), self.0)
    }
}

impl fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A boundary-delimited container of batch items.
pub trait BoundaryContainer {
    type Item;

    const KIND: BoundaryKind;

    fn id(&self) -> &BoundaryId;

    /// Append an item, returning its position.
    fn add_item(&mut self, item: Self::Item) -> Result<usize, BatchError>;

    fn boundary(&self) -> String {
        self.id().boundary(Self::KIND)
    }

    /// `Content-Type` value announcing this container's boundary.
    fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary())
    }
}

/// Lines of `bytes` as `(start, line, next)`: the offset where the line
/// starts, the line without its `\n` or `\r\n` terminator, and the offset of
/// the following line.
pub(crate) fn lines(bytes: &[u8]) -> impl Iterator<Item = (usize, &[u8], usize)> + '_ {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let line_start = start;
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| start + i);
        start = (end + 1).min(bytes.len());
        let line = &bytes[line_start..end];
        Some((line_start, line.strip_suffix(&b"\r"[..]).unwrap_or(line), start))
    })
}

/// `bytes` from its first non-blank line on.
pub(crate) fn skip_blank_lines(bytes: &[u8]) -> &[u8] {
    let start = lines(bytes)
        .find(|(_, line, _)| !line.trim_ascii().is_empty())
        .map_or(bytes.len(), |(start, _, _)| start);
    &bytes[start..]
}

/// Split at the first blank line into the header block and the untouched
/// remainder. Without a blank line everything is header block.
pub(crate) fn split_head(bytes: &[u8]) -> (&[u8], &[u8]) {
    match lines(bytes).find(|(_, line, _)| line.trim_ascii().is_empty()) {
        Some((start, _, next)) => (&bytes[..start], &bytes[next..]),
        None => (bytes, &bytes[bytes.len()..]),
    }
}

/// Split a multipart body into the raw bytes of each part.
///
/// Delimiters are whole lines `--{boundary}`, the closing one `--{boundary}--`.
/// The line break before a delimiter belongs to the delimiter; every other
/// byte of a part is returned as sent. Preamble and epilogue are discarded,
/// and a missing closing delimiter still yields the last open part.
pub(crate) fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let closing = format!("--{boundary}--");
    let mut parts = Vec::new();
    let mut open: Option<usize> = None;

    for (start, line, next) in lines(body) {
        let line = line.trim_ascii_end();
        let is_closing = line == closing.as_bytes();
        if !is_closing && line != delimiter.as_bytes() {
            continue;
        }
        parts.extend(open.take().map(|from| strip_line_break(&body[from..start])));
        if is_closing {
            return parts;
        }
        open = Some(next);
    }
    parts.extend(open.map(|from| &body[from..]));
    parts
}

fn strip_line_break(part: &[u8]) -> &[u8] {
    part.strip_suffix(&b"\r\n"[..])
        .or_else(|| part.strip_suffix(&b"\n"[..]))
        .unwrap_or(part)
}
