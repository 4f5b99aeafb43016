//! Drives a response body through the event parser.
//!
//! Bytes are decoded to text incrementally, appended to the call's buffer,
//! and every complete frame is dispatched before the next chunk is read.

use crate::callbacks::{CompletionCallbacks, Dispatcher};
use crate::config::ParseErrorPolicy;
use crate::error::CompletionsError;
use crate::parse::parse_events;
use crate::transport::ByteStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// UTF-8 decoder that holds back a code point split across chunks.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left once the body has ended.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Reads `body` until it ends, errors, a terminal event arrives, or
/// `cancel` fires. Dropping `body` on return closes the connection.
pub(crate) async fn drive_stream<C: CompletionCallbacks>(
    mut body: ByteStream,
    dispatcher: &mut Dispatcher<C>,
    policy: ParseErrorPolicy,
    cancel: &CancellationToken,
    stream_id: Uuid,
) {
    let mut decoder = Utf8Decoder::default();
    let mut buffer = String::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                dispatcher.cancelled();
                return;
            }
            chunk = body.next() => {
                match chunk {
                    None => {
                        buffer.push_str(&decoder.finish());
                        if buffer.trim().is_empty() {
                            dispatcher.complete();
                        } else {
                            debug!(
                                "Completions stream {} ended mid-frame: {:?}",
                                stream_id, buffer
                            );
                            dispatcher.fail("stream ended with an incomplete frame");
                        }
                        return;
                    }
                    Some(Ok(bytes)) => {
                        buffer.push_str(&decoder.decode(&bytes));
                        buffer = consume(buffer, dispatcher, policy, stream_id);
                        if dispatcher.state().is_terminal() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Completions stream {} error: {}", stream_id, e);
                        dispatcher.fail(&e.to_string());
                        return;
                    }
                }
            }
        }
    }
}

/// Dispatch every complete frame in `buffer` and return the remainder.
fn consume<C: CompletionCallbacks>(
    mut buffer: String,
    dispatcher: &mut Dispatcher<C>,
    policy: ParseErrorPolicy,
    stream_id: Uuid,
) -> String {
    loop {
        match parse_events(&buffer) {
            Ok(result) => {
                for event in result.events {
                    dispatcher.dispatch(event);
                }
                return result.remaining_buffer;
            }
            Err(err) => {
                // Frames ahead of the bad one are complete and valid.
                if let Ok(before) = parse_events(&buffer[..err.start]) {
                    for event in before.events {
                        dispatcher.dispatch(event);
                    }
                }
                match policy {
                    ParseErrorPolicy::Abort => {
                        dispatcher.fail(&CompletionsError::Parse(err).to_string());
                        return String::new();
                    }
                    ParseErrorPolicy::LogAndContinue => {
                        warn!(
                            "Completions stream {} skipping malformed frame: {}",
                            stream_id, err
                        );
                        buffer = buffer[err.end..].to_string();
                    }
                }
            }
        }
    }
}
