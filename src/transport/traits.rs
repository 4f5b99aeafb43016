use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use std::pin::Pin;

/// Response body as it arrives off the wire.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// An outbound POST.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

/// Status plus a body that has not been read yet.
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Vec<u8>, TransportError> {
        self.body
            .try_fold(Vec::new(), |mut out, chunk| async move {
                out.extend_from_slice(&chunk);
                Ok(out)
            })
            .await
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Sends a request and hands back the response stream. Dropping the body
/// stream tears the connection down.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
