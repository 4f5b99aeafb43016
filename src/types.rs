use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// One decoded unit of the completions event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompletionEvent {
    /// Model output so far.
    Completion { completion: String },
    /// Server-signaled failure, distinct from transport errors.
    Error { error: String },
    /// Normal end of stream.
    Done,
}

impl CompletionEvent {
    /// The `event:` name this variant is carried under on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Completion { .. } => "completion",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub speaker: Speaker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Message {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Human,
            text: Some(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: Some(text.into()),
        }
    }

    /// An assistant turn with no text, used to prompt the model to continue.
    pub fn assistant_prefill() -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: None,
        }
    }
}

/// Body of a streaming chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionParameters {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens_to_sample: u32,
    pub top_k: i32,
    pub top_p: f32,
}

impl Default for CompletionParameters {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.2,
            max_tokens_to_sample: 1000,
            top_k: -1,
            top_p: -1.0,
        }
    }
}

/// Body of a single-shot code completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCompletionParameters {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens_to_sample: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub top_k: i32,
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CodeCompletionParameters {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.5,
            max_tokens_to_sample: 256,
            stop_sequences: Vec::new(),
            top_k: -1,
            top_p: -1.0,
            model: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Result of a single-shot code completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCompletionResponse {
    pub completion: String,
    pub stop_reason: String,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub truncated: bool,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub exception: Option<String>,
    #[serde(
        rename = "logID",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_id: Option<String>,
}

/// Only `completion` and `stopReason` are required; extras of an unexpected
/// type (`null`, a number where a string was expected) fall back to default.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_parameters_wire_names() {
        let params = CompletionParameters {
            messages: vec![Message::human("hi"), Message::assistant_prefill()],
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["maxTokensToSample"], 1000);
        assert_eq!(json["topK"], -1);
        assert_eq!(json["messages"][0]["speaker"], "human");
        assert_eq!(json["messages"][0]["text"], "hi");
        // Prefill turn carries no text field at all
        assert!(json["messages"][1].get("text").is_none());
    }

    #[test]
    fn test_code_completion_response_optional_fields() {
        let resp: CodeCompletionResponse = serde_json::from_str(
            r#"{"completion":"x","stopReason":"stop","truncated":true,"logID":"abc"}"#,
        )
        .unwrap();
        assert_eq!(resp.completion, "x");
        assert_eq!(resp.stop_reason, "stop");
        assert!(resp.truncated);
        assert_eq!(resp.log_id.as_deref(), Some("abc"));
        assert!(resp.stop.is_none());
    }

    #[test]
    fn test_code_completion_response_mistyped_extras_default() {
        let resp: CodeCompletionResponse = serde_json::from_str(
            r#"{"completion":"x","stopReason":"stop","truncated":null,"logID":123,"stop":false,"exception":{}}"#,
        )
        .unwrap();
        assert_eq!(resp.completion, "x");
        assert!(!resp.truncated);
        assert!(resp.log_id.is_none());
        assert!(resp.stop.is_none());
        assert!(resp.exception.is_none());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(CompletionEvent::Done.name(), "done");
        assert_eq!(
            CompletionEvent::Completion {
                completion: String::new()
            }
            .name(),
            "completion"
        );
    }
}
