use crate::parse::ParseError;

/// Failure of the underlying request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("response body error: {0}")]
    Body(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionsError {
    #[error("Network error: {0}")]
    Transport(#[from] TransportError),
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("error parsing response {body} as CodeCompletionResponse: {message}")]
    InvalidJson { body: String, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("cannot serialize request: {0}")]
    Serialize(String),
    #[error("Config error: {0}")]
    Config(String),
}
