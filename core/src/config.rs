//! Client configuration.
//!
//! # Design
//! `ClientConfig` is plain serde data so it can be loaded from a JSON file or
//! built in code. The protocol version only changes defaults (result paths and
//! version headers); the multipart framing is the same for V2 and V4.

use serde::Deserialize;

use crate::error::BatchError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ODataVersion {
    #[default]
    #[serde(alias = "2.0", alias = "v2")]
    V2,
    #[serde(alias = "4.0", alias = "v4")]
    V4,
}

impl ODataVersion {
    /// JSON path of a collection in a list response.
    pub fn list_result_path(&self) -> &'static str {
        match self {
            ODataVersion::V2 => "d.results",
            ODataVersion::V4 => "value",
        }
    }

    /// JSON path of the entity in a single-entity response.
    pub fn instance_result_path(&self) -> &'static str {
        match self {
            ODataVersion::V2 => "d",
            ODataVersion::V4 => "",
        }
    }

    /// Version headers stamped on every sub-request.
    pub fn version_headers(&self) -> [(&'static str, &'static str); 2] {
        match self {
            ODataVersion::V2 => [("DataServiceVersion", "2.0"), ("MaxDataServiceVersion", "2.0")],
            ODataVersion::V4 => [("OData-Version", "4.0"), ("OData-MaxVersion", "4.0")],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub service_root: String,
    #[serde(default)]
    pub version: ODataVersion,
    /// Default `$top` for list requests without one.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Return the full response envelope instead of plain results.
    #[serde(default)]
    pub raw: bool,
}

impl ClientConfig {
    pub fn new(service_root: &str) -> Self {
        Self {
            service_root: service_root.to_string(),
            version: ODataVersion::default(),
            page_size: None,
            raw: false,
        }
        .normalized()
    }

    pub fn from_json(text: &str) -> Result<Self, BatchError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| BatchError::SerializationError(e.to_string()))?;
        Ok(config.normalized())
    }

    pub fn with_version(mut self, version: ODataVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    fn normalized(mut self) -> Self {
        self.service_root = self.service_root.trim_end_matches('/').to_string();
        self
    }
}
