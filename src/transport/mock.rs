//! Mock transport for testing. No real network calls.

use super::traits::*;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One step of a scripted response body.
#[derive(Debug, Clone)]
pub enum MockChunk {
    Data(Bytes),
    /// Fail the body mid-stream.
    Error(String),
    /// Sleep before the next step.
    Delay(Duration),
    /// Never yield again, like a connection that stays open.
    Hang,
}

impl MockChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Data(Bytes::from(text.into()))
    }
}

/// A scripted reply to one request.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Stream {
        status: StatusCode,
        chunks: Vec<MockChunk>,
    },
    /// The connection cannot be established.
    ConnectError(String),
}

impl MockResponse {
    /// 200 with the whole body in one chunk.
    pub fn body(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::chunks(vec![text])
    }

    /// 200 with each string delivered as its own chunk.
    pub fn chunks(chunks: Vec<impl Into<String>>) -> Self {
        Self::Stream {
            status: StatusCode::OK,
            chunks: chunks.into_iter().map(MockChunk::text).collect(),
        }
    }

    pub fn status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Stream {
            status,
            chunks: vec![MockChunk::text(body)],
        }
    }

    /// 200 whose body never arrives.
    pub fn pending() -> Self {
        Self::Stream {
            status: StatusCode::OK,
            chunks: vec![MockChunk::Hang],
        }
    }
}

/// Mock transport for tests. Supply a sequence of responses; each `post`
/// consumes the next one and records the request.
pub struct MockTransport {
    responses: Mutex<Vec<MockResponse>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: transport that answers once with `text`
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![MockResponse::body(text)])
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<TransportRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn body_stream(chunks: Vec<MockChunk>) -> ByteStream {
    let stream = futures::stream::iter(chunks)
        .then(|chunk| async move {
            match chunk {
                MockChunk::Data(bytes) => Some(Ok(bytes)),
                MockChunk::Error(message) => Some(Err(TransportError::Body(message))),
                MockChunk::Delay(duration) => {
                    tokio::time::sleep(duration).await;
                    None
                }
                MockChunk::Hang => {
                    futures::future::pending::<()>().await;
                    None
                }
            }
        })
        .filter_map(futures::future::ready);
    Box::pin(stream)
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        lock(&self.requests).push(request);

        let response = {
            let mut responses = lock(&self.responses);
            if responses.is_empty() {
                MockResponse::ConnectError("no more mock responses".into())
            } else {
                responses.remove(0)
            }
        };

        match response {
            MockResponse::Stream { status, chunks } => Ok(TransportResponse {
                status,
                body: body_stream(chunks),
            }),
            MockResponse::ConnectError(message) => Err(TransportError::Connect(message)),
        }
    }
}
