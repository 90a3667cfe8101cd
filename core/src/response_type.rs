//! Expected result shape of a sub-operation.
//!
//! The tag is fixed when a `Request` is built. It drives the generated
//! request path (`/$count`, `/$value`, `$top` defaults) and, later, how
//! `Response::plain` extracts a result from the sub-response body. Both sides
//! derive from the same `ResponseShape` so they stay in sync.

/// Flags decided by the caller when it builds a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseShape {
    pub is_count: bool,
    pub is_list: bool,
    pub is_entity: bool,
    pub has_stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Count,
    List,
    Entity,
    /// Raw property or media value.
    Value,
    /// Binary items of a collection.
    ListStream,
    /// Binary content of a single entity.
    EntityStream,
}

impl ResponseType {
    /// Precedence: count, then stream, then list, then entity, else value.
    pub fn resolve(shape: ResponseShape) -> Self {
        match shape {
            ResponseShape { is_count: true, .. } => ResponseType::Count,
            ResponseShape { has_stream: true, is_list: true, .. } => ResponseType::ListStream,
            ResponseShape { has_stream: true, .. } => ResponseType::EntityStream,
            ResponseShape { is_list: true, .. } => ResponseType::List,
            ResponseShape { is_entity: true, .. } => ResponseType::Entity,
            _ => ResponseType::Value,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ResponseType::ListStream | ResponseType::EntityStream)
    }

    /// Relative request path for `resource` under this response type.
    ///
    /// `page_size` becomes a `$top` default on list requests that do not
    /// already limit their size.
    pub fn path(&self, resource: &str, page_size: Option<u32>) -> String {
        let (base, query) = match resource.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (resource, None),
        };
        let base = base.trim_end_matches('/');
        let base = match self {
            ResponseType::Count if !base.ends_with("/$count") => format!("{base}/$count"),
            ResponseType::EntityStream | ResponseType::Value if !base.ends_with("/$value") => {
                format!("{base}/$value")
            }
            _ => base.to_string(),
        };

        let mut params: Vec<String> = query
            .into_iter()
            .flat_map(|q| q.split('&'))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if matches!(self, ResponseType::List | ResponseType::ListStream) {
            if let Some(top) = page_size {
                if !params.iter().any(|p| p.starts_with("$top=")) {
                    params.push(format!("$top={top}"));
                }
            }
        }

        if params.is_empty() {
            base
        } else {
            format!("{base}?{}", params.join("&"))
        }
    }
}
