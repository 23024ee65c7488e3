use async_trait::async_trait;
use futures_util::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::transport::{Transfer, TransferResponse, Transport, Validators};
use crate::core::error::{EngineError, EngineResult};

/// [`Transport`] over the shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str, conditions: Option<&Validators>) -> EngineResult<Transfer> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some(conditions) = conditions {
            if let Some(etag) = &conditions.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &conditions.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    url: url.to_string(),
                    phase: "connecting to",
                }
            } else {
                EngineError::Http(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED && conditions.is_some() {
            debug!("{} not modified", url);
            return Ok(Transfer::NotModified);
        }
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        let validators = validators(response.headers());
        let source = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| EngineError::Transport {
                    url: source.clone(),
                    reason: e.to_string(),
                })
            })
            .boxed();

        Ok(Transfer::Body(TransferResponse {
            content_length,
            validators,
            body,
        }))
    }
}

fn validators(headers: &HeaderMap) -> Validators {
    let text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    Validators {
        etag: text(ETAG),
        last_modified: text(LAST_MODIFIED),
    }
}
