//! Byte-stream transport abstraction.
//!
//! Transfers only need "GET this URL and give me the body as a stream of
//! chunks". The [`Transport`] trait captures that, which lets tests drive
//! the whole engine from memory.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::manifest::{user_agent, CHANNEL_KEY_HEADER};

use super::error::{TransferError, TransferResult};

/// Boxed future for dyn-compatible async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body delivered chunk by chunk.
pub type BodyStream = Pin<Box<dyn Stream<Item = TransferResult<Bytes>> + Send>>;

/// Default connect timeout (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Sent as the `channel-key` header when present.
    pub channel_key: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel_key: None,
        }
    }

    pub fn with_channel_key(mut self, key: Option<String>) -> Self {
        self.channel_key = key;
        self
    }
}

/// A successful response whose body has not been read yet.
pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl FetchResponse {
    /// Build a response from an in-memory body split into `chunk_size` pieces.
    pub fn from_bytes(data: Bytes, chunk_size: usize) -> Self {
        let len = data.len() as u64;
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<TransferResult<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        Self {
            content_length: Some(len),
            body: Box::pin(stream::iter(chunks)),
        }
    }

    /// Collect the whole body.
    pub async fn read_to_end(mut self) -> TransferResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.content_length.unwrap_or(0) as usize);
        while let Some(chunk) = self.body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Request/response byte-stream transport.
///
/// Implementations map "no such file" to [`TransferError::NotFound`] so the
/// retry layer can fail it immediately.
pub trait Transport: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, TransferResult<FetchResponse>>;
}

/// HTTP transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default connect timeout.
    pub fn new() -> TransferResult<Self> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a transport with a custom connect timeout.
    ///
    /// No overall request timeout is set: large files legitimately take
    /// minutes, and slow bodies are caught by stall detection instead.
    pub fn with_connect_timeout(timeout: Duration) -> TransferResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransferError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransferError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

impl Transport for ReqwestTransport {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, TransferResult<FetchResponse>> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url);
            if let Some(key) = &request.channel_key {
                builder = builder.header(CHANNEL_KEY_HEADER, key);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| map_reqwest_error(&request.url, e))?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(TransferError::NotFound { url: request.url });
            }
            if !status.is_success() {
                return Err(TransferError::Http {
                    url: request.url,
                    status: status.as_u16(),
                });
            }

            let content_length = response.content_length();
            let url = request.url;
            let body = stream::unfold(Some(response), move |state| {
                let url = url.clone();
                async move {
                    let mut response = state?;
                    match response.chunk().await {
                        Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                        Ok(None) => None,
                        Err(e) => Some((Err(map_reqwest_error(&url, e)), None)),
                    }
                }
            });

            Ok(FetchResponse {
                content_length,
                body: Box::pin(body),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_bytes_chunks_and_collects() {
        let response = FetchResponse::from_bytes(Bytes::from_static(b"hello world"), 4);
        assert_eq!(response.content_length, Some(11));
        assert_eq!(response.read_to_end().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_empty_body() {
        let response = FetchResponse::from_bytes(Bytes::new(), 4);
        assert!(response.read_to_end().await.unwrap().is_empty());
    }

    #[test]
    fn test_request_builder() {
        let request = FetchRequest::new("https://cdn/a").with_channel_key(Some("k".into()));
        assert_eq!(request.channel_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new().is_ok());
    }
}
