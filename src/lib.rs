pub mod callbacks;
pub mod client;
pub mod config;
pub mod error;
pub mod parse;
mod sse;
pub mod transport;
pub mod types;

pub use callbacks::{Callbacks, CompletionCallbacks, StreamState};
pub use client::{CompletionsClient, StreamHandle};
pub use config::{ClientConfig, Endpoint, Mode, ParseErrorPolicy, Scheme};
pub use error::{CompletionsError, TransportError};
pub use parse::{parse_events, ParseError, ParseErrorKind, ParseResult};
pub use types::*;
