//! reqwest-backed transport.

use super::traits::*;
use crate::config::ClientConfig;
use crate::error::{CompletionsError, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the HTTP client for `config`. Certificate validation is turned
    /// off only when [`ClientConfig::accepts_invalid_certs`] says so.
    pub fn new(config: &ClientConfig) -> Result<Self, CompletionsError> {
        let accept_invalid = config.accepts_invalid_certs();
        if accept_invalid {
            warn!(
                "TLS certificate validation disabled: mode={}, instance={}",
                config.mode(),
                config.instance()
            );
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid)
            .build()
            .map_err(|e| CompletionsError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing client as-is.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        debug!("POST {}", request.url);
        let response = self
            .client
            .post(request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Body(e.to_string())));

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}
