//! Completions client: single-shot code completions and streaming chat
//! completions with cancellation.

use crate::callbacks::{CompletionCallbacks, Dispatcher, StreamState};
use crate::config::{ClientConfig, Endpoint, ParseErrorPolicy};
use crate::error::CompletionsError;
use crate::sse::drive_stream;
use crate::transport::{HttpTransport, Transport, TransportRequest};
use crate::types::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Client for the completions API. Clones share configuration and
/// transport; each call owns its own buffer.
#[derive(Clone)]
pub struct CompletionsClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl CompletionsClient {
    /// Client backed by a reqwest HTTP transport.
    pub fn new(config: ClientConfig) -> Result<Self, CompletionsError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request a code completion and wait for the whole response.
    pub async fn complete(
        &self,
        params: &CodeCompletionParameters,
    ) -> Result<CodeCompletionResponse, CompletionsError> {
        let request = build_request(&self.config, self.config.code_completions_endpoint(), params)?;
        debug!(
            "Code completion request: url={}, max_tokens={}",
            request.url, params.max_tokens_to_sample
        );

        let response = self.transport.post(request).await?;
        let status = response.status;
        let body = response.collect().await?;
        let body = String::from_utf8_lossy(&body).into_owned();

        if !status.is_success() {
            return Err(CompletionsError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_code_completion(&body)
    }

    /// Start a streaming completion. The request is issued on a spawned
    /// task right away; events reach `callbacks` as frames arrive.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn stream<C: CompletionCallbacks>(
        &self,
        params: &CompletionParameters,
        callbacks: C,
    ) -> StreamHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let request = build_request(&self.config, self.config.completions_endpoint(), params);
        let transport = Arc::clone(&self.transport);
        let policy = self.config.parse_error_policy();
        let token = cancel.clone();

        debug!(
            "Starting completions stream {}: messages={}",
            id,
            params.messages.len()
        );
        let task = tokio::spawn(async move {
            let mut dispatcher = Dispatcher::new(callbacks, token.clone());
            run_stream(id, transport, request, policy, &mut dispatcher, &token).await;
            let state = dispatcher.state();
            debug!("Completions stream {} finished: {:?}", id, state);
            state
        });

        StreamHandle { id, cancel, task }
    }
}

async fn run_stream<C: CompletionCallbacks>(
    id: Uuid,
    transport: Arc<dyn Transport>,
    request: Result<TransportRequest, CompletionsError>,
    policy: ParseErrorPolicy,
    dispatcher: &mut Dispatcher<C>,
    cancel: &CancellationToken,
) {
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            dispatcher.fail(&e.to_string());
            return;
        }
    };

    dispatcher.advance(StreamState::Connecting);
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            dispatcher.cancelled();
            return;
        }
        response = transport.post(request) => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            warn!("Completions stream {} request failed: {}", id, e);
            dispatcher.fail(&CompletionsError::from(e).to_string());
            return;
        }
    };

    let status = response.status;
    if !status.is_success() {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                dispatcher.cancelled();
                return;
            }
            body = response.collect() => body.unwrap_or_default(),
        };
        let err = CompletionsError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        };
        warn!("Completions stream {} rejected: {}", id, err);
        dispatcher.fail(&err.to_string());
        return;
    }

    dispatcher.advance(StreamState::Streaming);
    drive_stream(response.body, dispatcher, policy, cancel, id).await;
}

fn build_request(
    config: &ClientConfig,
    endpoint: &Endpoint,
    params: &impl Serialize,
) -> Result<TransportRequest, CompletionsError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(token) = config.access_token() {
        let value = HeaderValue::from_str(&format!("token {token}"))
            .map_err(|_| CompletionsError::Config("invalid access token format".into()))?;
        headers.insert(AUTHORIZATION, value);
    }

    let body =
        serde_json::to_string(params).map_err(|e| CompletionsError::Serialize(e.to_string()))?;

    Ok(TransportRequest {
        url: endpoint.url().clone(),
        headers,
        body,
    })
}

/// Decode a single-shot response, rejecting bodies whose `completion` or
/// `stopReason` is not a string.
fn parse_code_completion(body: &str) -> Result<CodeCompletionResponse, CompletionsError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| CompletionsError::InvalidJson {
            body: body.to_string(),
            message: e.to_string(),
        })?;

    let has_string = |field: &str| value.get(field).is_some_and(serde_json::Value::is_string);
    if !has_string("completion") || !has_string("stopReason") {
        return Err(CompletionsError::Validation(format!(
            "response {value} does not satisfy CodeCompletionResponse"
        )));
    }

    serde_json::from_value(value).map_err(|e| {
        CompletionsError::Validation(format!(
            "response does not satisfy CodeCompletionResponse: {e}"
        ))
    })
}

/// Handle to a running stream.
///
/// Dropping the handle does not cancel the stream.
#[derive(Debug)]
pub struct StreamHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<StreamState>,
}

impl StreamHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Abort the request. No callback fires once this returns, except one
    /// that was already running on the stream task at the time.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A detached zero-argument canceller for this stream.
    pub fn cancel_fn(&self) -> impl Fn() + Send + Sync + 'static {
        let token = self.cancel.clone();
        move || token.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream task and return its terminal state.
    pub async fn finished(self) -> StreamState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!("Completions stream {} task failed: {}", self.id, e);
                StreamState::Errored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code_completion_ok() {
        let resp = parse_code_completion(r#"{"completion":"x","stopReason":"stop"}"#).unwrap();
        assert_eq!(resp.completion, "x");
        assert_eq!(resp.stop_reason, "stop");
    }

    #[test]
    fn test_parse_code_completion_wrong_type() {
        let err = parse_code_completion(r#"{"completion":42}"#).unwrap_err();
        assert!(matches!(err, CompletionsError::Validation(_)));
        assert!(err.to_string().contains("does not satisfy CodeCompletionResponse"));
    }

    #[test]
    fn test_parse_code_completion_tolerates_mistyped_extras() {
        let resp =
            parse_code_completion(r#"{"completion":"x","stopReason":"stop","truncated":null}"#)
                .unwrap();
        assert_eq!(resp.completion, "x");
        assert!(!resp.truncated);

        let resp =
            parse_code_completion(r#"{"completion":"x","stopReason":"stop","logID":123}"#)
                .unwrap();
        assert_eq!(resp.stop_reason, "stop");
        assert!(resp.log_id.is_none());
    }

    #[test]
    fn test_parse_code_completion_not_json() {
        let err = parse_code_completion("<html>502</html>").unwrap_err();
        assert!(matches!(err, CompletionsError::InvalidJson { .. }));
        assert!(err.to_string().contains("<html>502</html>"));
    }

    #[test]
    fn test_build_request_headers() {
        let config = ClientConfig::new("https://example.com")
            .unwrap()
            .with_access_token("abc");
        let request = build_request(
            &config,
            config.completions_endpoint(),
            &CompletionParameters::default(),
        )
        .unwrap();
        assert_eq!(request.headers[AUTHORIZATION], "token abc");
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");

        let anonymous = ClientConfig::new("https://example.com").unwrap();
        let request = build_request(
            &anonymous,
            anonymous.code_completions_endpoint(),
            &CodeCompletionParameters::new("fn"),
        )
        .unwrap();
        assert!(request.headers.get(AUTHORIZATION).is_none());
        assert!(request.body.contains("\"prompt\":\"fn\""));
    }

    #[test]
    fn test_build_request_rejects_bad_token() {
        let config = ClientConfig::new("https://example.com")
            .unwrap()
            .with_access_token("bad\ntoken");
        let err = build_request(
            &config,
            config.completions_endpoint(),
            &CompletionParameters::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompletionsError::Config(_)));
    }
}
