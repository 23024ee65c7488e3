use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::transport::{Transfer, TransferResponse, Transport, Validators};
use crate::core::error::{EngineError, EngineResult};

#[derive(Clone)]
enum Route {
    Bytes {
        data: Vec<u8>,
        chunk: usize,
        etag: Option<String>,
    },
    Status(u16),
    Failure(String),
    /// Sends one chunk, then never finishes.
    Stall { first: Vec<u8> },
}

/// In-memory [`Transport`] with canned answers per URL. Unknown URLs get 404.
/// A conditional request whose `etag` matches the route's gets `NotModified`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(self, url: &str, route: Route) -> Self {
        self.routes.lock().insert(url.to_string(), route);
        self
    }

    pub fn with_bytes(self, url: &str, data: Vec<u8>) -> Self {
        let chunk = data.len().max(1);
        self.route(url, Route::Bytes { data, chunk, etag: None })
    }

    pub fn with_chunks(self, url: &str, data: Vec<u8>, chunk: usize) -> Self {
        let chunk = chunk.max(1);
        self.route(url, Route::Bytes { data, chunk, etag: None })
    }

    pub fn with_etag(self, url: &str, data: Vec<u8>, etag: &str) -> Self {
        let chunk = data.len().max(1);
        let etag = Some(etag.to_string());
        self.route(url, Route::Bytes { data, chunk, etag })
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.route(url, Route::Status(status))
    }

    pub fn with_failure(self, url: &str, reason: &str) -> Self {
        self.route(url, Route::Failure(reason.to_string()))
    }

    pub fn with_stall(self, url: &str, first: Vec<u8>) -> Self {
        self.route(url, Route::Stall { first })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &str, conditions: Option<&Validators>) -> EngineResult<Transfer> {
        self.calls.lock().push(url.to_string());
        let route = self.routes.lock().get(url).cloned();

        match route {
            Some(Route::Bytes { data, chunk, etag }) => {
                let sent = conditions.and_then(|c| c.etag.as_ref());
                if etag.is_some() && sent == etag.as_ref() {
                    return Ok(Transfer::NotModified);
                }
                let content_length = Some(data.len() as u64);
                let chunks: Vec<EngineResult<Bytes>> = data
                    .chunks(chunk)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(Transfer::Body(TransferResponse {
                    content_length,
                    validators: Validators {
                        etag,
                        last_modified: None,
                    },
                    body: stream::iter(chunks).boxed(),
                }))
            }
            Some(Route::Stall { first }) => Ok(Transfer::Body(TransferResponse {
                content_length: None,
                validators: Validators::default(),
                body: stream::iter(vec![Ok(Bytes::from(first))])
                    .chain(stream::pending())
                    .boxed(),
            })),
            Some(Route::Failure(reason)) => Err(EngineError::Transport {
                url: url.to_string(),
                reason,
            }),
            Some(Route::Status(status)) => Err(EngineError::HttpStatus {
                url: url.to_string(),
                status,
            }),
            None => Err(EngineError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
