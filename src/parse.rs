//! Incremental parser for the completions event stream.
//!
//! The backend answers a streaming request with line-oriented frames:
//!
//! ```text
//! event: completion
//! data: {"completion":"fn main"}
//!
//! ```
//!
//! Frames end at a blank line. Both LF and CRLF line endings are accepted,
//! so `\n\n` and `\r\n\r\n` each terminate a frame.
//!
//! [`parse_events`] is pure: it takes everything accumulated so far and
//! returns the complete frames it found plus the unconsumed tail. Callers
//! append the next chunk to that tail and parse again.

use crate::types::CompletionEvent;
use serde::de::DeserializeOwned;
use serde::Deserialize;


/// Output of one [`parse_events`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub events: Vec<CompletionEvent>,
    /// Trailing text that does not yet form a complete frame.
    pub remaining_buffer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("frame has no event field")]
    MissingEvent,
    #[error("unknown event type {0:?}")]
    UnknownEvent(String),
    #[error("{0:?} event has no data field")]
    MissingData(String),
    #[error("invalid {event:?} payload: {message}")]
    InvalidData { event: String, message: String },
}

/// A complete frame that could not be decoded.
///
/// `start..end` is the frame's byte range in the parsed buffer, separator
/// included, so callers can skip exactly the offending frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse event frame {frame:?}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub frame: String,
    pub start: usize,
    pub end: usize,
}

/// Extract every complete frame from `buffer`.
///
/// Incomplete trailing data is never an error; it comes back verbatim in
/// [`ParseResult::remaining_buffer`].
pub fn parse_events(buffer: &str) -> Result<ParseResult, ParseError> {
    let mut events = Vec::new();
    let mut start = 0;

    while let Some((pos, len)) = find_separator(&buffer[start..]) {
        let frame_end = start + pos;
        let end = frame_end + len;
        let frame = &buffer[start..frame_end];

        match parse_frame(frame) {
            Ok(Some(event)) => events.push(event),
            // keep-alive
            Ok(None) => {}
            Err(kind) => {
                return Err(ParseError {
                    kind,
                    frame: frame.to_string(),
                    start,
                    end,
                })
            }
        }
        start = end;
    }

    Ok(ParseResult {
        events,
        remaining_buffer: buffer[start..].to_string(),
    })
}

/// Offset and length of the first blank line, either `\n\n` or `\n\r\n`.
/// The frame runs up to the offset; a `\r` left at its end is stripped with
/// the line.
fn find_separator(buffer: &str) -> Option<(usize, usize)> {
    let bytes = buffer.as_bytes();
    let mut from = 0;
    while let Some(offset) = buffer[from..].find('\n') {
        let pos = from + offset;
        match &bytes[pos + 1..] {
            [b'\n', ..] => return Some((pos, 2)),
            [b'\r', b'\n', ..] => return Some((pos, 3)),
            _ => from = pos + 1,
        }
    }
    None
}

/// Decode one frame. `Ok(None)` means the frame held only comments or
/// blank lines.
fn parse_frame(frame: &str) -> Result<Option<CompletionEvent>, ParseErrorKind> {
    let mut event_type: Option<&str> = None;
    let mut data: Option<String> = None;
    let mut has_fields = false;

    for line in frame.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        has_fields = true;

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_type = Some(value),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            // id, retry
            _ => {}
        }
    }

    if !has_fields {
        return Ok(None);
    }
    let Some(event_type) = event_type else {
        return Err(ParseErrorKind::MissingEvent);
    };
    decode_event(event_type, data.as_deref()).map(Some)
}

#[derive(Deserialize)]
struct CompletionPayload {
    completion: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: String,
}

fn decode_event(name: &str, data: Option<&str>) -> Result<CompletionEvent, ParseErrorKind> {
    match name {
        "completion" => {
            let payload: CompletionPayload = decode_data(name, data)?;
            Ok(CompletionEvent::Completion {
                completion: payload.completion,
            })
        }
        "error" => {
            let payload: ErrorPayload = decode_data(name, data)?;
            Ok(CompletionEvent::Error {
                error: payload.error,
            })
        }
        "done" => Ok(CompletionEvent::Done),
        other => Err(ParseErrorKind::UnknownEvent(other.to_string())),
    }
}

fn decode_data<T: DeserializeOwned>(event: &str, data: Option<&str>) -> Result<T, ParseErrorKind> {
    let data = data.ok_or_else(|| ParseErrorKind::MissingData(event.to_string()))?;
    serde_json::from_str(data).map_err(|e| ParseErrorKind::InvalidData {
        event: event.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(text: &str) -> CompletionEvent {
        CompletionEvent::Completion {
            completion: text.into(),
        }
    }

    fn sample_stream() -> String {
        [
            "event: completion\ndata: {\"completion\":\"fn\"}\n\n",
            ": keep-alive\n\n",
            "event: completion\ndata: {\"completion\":\"fn main() { println!(\\\"héllo\\\"); }\"}\n\n",
            "event: error\ndata: {\"error\":\"rate limited\"}\n\n",
            "event: done\ndata: {}\n\n",
        ]
        .concat()
    }

    #[test]
    fn test_frame_split_inside_json() {
        let first = "event: completion\ndata: {\"completion\":\"hel";
        let result = parse_events(first).unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.remaining_buffer, first);

        let buffer = format!("{}{}", result.remaining_buffer, "lo\"}\n\n");
        let result = parse_events(&buffer).unwrap();
        assert_eq!(result.events, vec![completion("hello")]);
        assert_eq!(result.remaining_buffer, "");
    }

    #[test]
    fn test_done_event() {
        let result = parse_events("event: done\ndata: {}\n\n").unwrap();
        assert_eq!(result.events, vec![CompletionEvent::Done]);
        assert_eq!(result.remaining_buffer, "");
    }

    #[test]
    fn test_done_without_data() {
        let result = parse_events("event: done\n\n").unwrap();
        assert_eq!(result.events, vec![CompletionEvent::Done]);
    }

    #[test]
    fn test_multiple_events_in_order() {
        let result = parse_events(&sample_stream()).unwrap();
        assert_eq!(
            result.events,
            vec![
                completion("fn"),
                completion("fn main() { println!(\"héllo\"); }"),
                CompletionEvent::Error {
                    error: "rate limited".into()
                },
                CompletionEvent::Done,
            ]
        );
        assert!(result.remaining_buffer.is_empty());
    }

    #[test]
    fn test_unknown_event_is_error() {
        let buffer = "event: completion\ndata: {\"completion\":\"a\"}\n\nevent: usage\ndata: {}\n\nevent: done\n";
        let err = parse_events(buffer).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownEvent("usage".into()));
        assert_eq!(err.frame, "event: usage\ndata: {}");
        assert_eq!(&buffer[err.start..err.end], "event: usage\ndata: {}\n\n");
    }

    #[test]
    fn test_invalid_json_payload() {
        let err = parse_events("event: completion\ndata: {not json}\n\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::InvalidData { ref event, .. } if event == "completion"));
        assert_eq!(err.start, 0);
    }

    #[test]
    fn test_wrong_payload_shape() {
        let err = parse_events("event: completion\ndata: {\"completion\":42}\n\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::InvalidData { .. }));
    }

    #[test]
    fn test_missing_event_field() {
        let err = parse_events("data: {\"completion\":\"x\"}\n\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingEvent);
    }

    #[test]
    fn test_missing_data_field() {
        let err = parse_events("event: completion\n\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingData("completion".into()));
    }

    #[test]
    fn test_field_without_space_and_multiline_data() {
        let result =
            parse_events("id: 7\nevent:completion\ndata: {\"completion\":\ndata: \"ok\"}\n\n").unwrap();
        assert_eq!(result.events, vec![completion("ok")]);
    }

    #[test]
    fn test_crlf_field_lines() {
        let result =
            parse_events("event: completion\r\ndata: {\"completion\":\"x\"}\r\n\n").unwrap();
        assert_eq!(result.events, vec![completion("x")]);
        assert_eq!(result.remaining_buffer, "");
    }

    #[test]
    fn test_crlf_separated_frames() {
        let input = "event: completion\r\ndata: {\"completion\":\"a\"}\r\n\r\n\
                     : ping\r\n\r\n\
                     event: done\r\n\r\n\
                     event: completion\r\n";
        let result = parse_events(input).unwrap();
        assert_eq!(result.events, vec![completion("a"), CompletionEvent::Done]);
        assert_eq!(result.remaining_buffer, "event: completion\r\n");

        for split in 0..=input.len() {
            let first = parse_events(&input[..split]).unwrap();
            let rest = format!("{}{}", first.remaining_buffer, &input[split..]);
            let second = parse_events(&rest).unwrap();
            let mut events = first.events;
            events.extend(second.events);
            assert_eq!(events, result.events, "split at {split}");
            assert_eq!(second.remaining_buffer, result.remaining_buffer);
        }
    }

    #[test]
    fn test_crlf_bad_frame_offsets() {
        let input = "event: nope\r\ndata: {}\r\n\r\nevent: done\r\n\r\n";
        let err = parse_events(input).unwrap_err();
        assert_eq!(err.start, 0);
        assert_eq!(&input[err.end..], "event: done\r\n\r\n");
    }

    #[test]
    fn test_empty_and_comment_frames_are_consumed() {
        let result = parse_events("\n\n: ping\n\nevent: done\n").unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.remaining_buffer, "event: done\n");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let inputs = [
            sample_stream(),
            "event: completion\ndata: {\"comp".to_string(),
            "event: nope\ndata: {}\n\n".to_string(),
            String::new(),
        ];
        for input in &inputs {
            assert_eq!(parse_events(input), parse_events(input));
        }
    }

    #[test]
    fn test_remainder_is_suffix_without_complete_frames() {
        let stream = sample_stream();
        for cut in (0..=stream.len()).filter(|&i| stream.is_char_boundary(i)) {
            let input = &stream[..cut];
            let result = parse_events(input).unwrap();
            assert!(input.ends_with(&result.remaining_buffer));
            let again = parse_events(&result.remaining_buffer).unwrap();
            assert!(again.events.is_empty(), "remainder at {cut} held a frame");
            assert_eq!(again.remaining_buffer, result.remaining_buffer);
        }
    }

    #[test]
    fn test_split_at_any_offset_matches_whole_parse() {
        let stream = sample_stream();
        let whole = parse_events(&stream).unwrap().events;

        for cut in (0..=stream.len()).filter(|&i| stream.is_char_boundary(i)) {
            let first = parse_events(&stream[..cut]).unwrap();
            let carried = format!("{}{}", first.remaining_buffer, &stream[cut..]);
            let second = parse_events(&carried).unwrap();

            let mut events = first.events;
            events.extend(second.events);
            assert_eq!(events, whole, "split at byte {cut}");
            assert!(second.remaining_buffer.is_empty());
        }
    }
}
