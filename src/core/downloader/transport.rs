use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::core::error::EngineResult;

/// HTTP cache validators of a downloaded copy (`ETag` / `Last-Modified`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// An opened transfer: the advertised length, the validators the server
/// sent, and a stream of body chunks.
pub struct TransferResponse {
    pub content_length: Option<u64>,
    pub validators: Validators,
    pub body: BoxStream<'static, EngineResult<Bytes>>,
}

pub enum Transfer {
    Body(TransferResponse),
    /// The copy described by the request's validators is still current.
    NotModified,
}

/// Opens byte streams for candidate URLs.
///
/// With `conditions`, the request is conditional and may be answered with
/// [`Transfer::NotModified`]. A non-success status must be reported from
/// `open`, not as an empty body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str, conditions: Option<&Validators>) -> EngineResult<Transfer>;
}
