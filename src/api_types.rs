//! Wire types for the OpenAI-compatible chat completions surface.

use serde::{Deserialize, Serialize};

/// A single chat message. Unknown roles are accepted and carried through
/// verbatim; the relay does not interpret them beyond normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionsRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Streaming is rejected at ingress with 400.
    #[serde(default)]
    pub stream: bool,
}

fn default_model() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionsChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Response envelope matching the OpenAI chat-completions shape. This is
/// also the value serialized into both cache tiers, so its serde layout is
/// part of the cache format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionsResponse {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionsChoice>,
    pub usage: Usage,
}

fn default_object() -> String {
    "chat.completion".to_string()
}

impl ChatCompletionsResponse {
    /// Build the standard single-choice assistant envelope.
    pub fn assistant(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        content: impl Into<String>,
        usage: Usage,
    ) -> Self {
        Self {
            id: id.into(),
            object: default_object(),
            created,
            model: model.into(),
            choices: vec![ChatCompletionsChoice {
                index: 0,
                message: ChatMessage::new("assistant", content),
                finish_reason: Some("stop".to_string()),
            }],
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req: ChatCompletionsRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert_eq!(req.model, "local");
        assert!(!req.stream);
        assert!(req.temperature.is_none());
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn response_roundtrips_through_cache_format() {
        let resp = ChatCompletionsResponse::assistant(
            "req-1",
            1_700_000_000,
            "m",
            "hello",
            Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            },
        );
        let bytes = serde_json::to_vec(&resp).unwrap();
        let back: ChatCompletionsResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.object, "chat.completion");
        assert_eq!(back.choices[0].message.content, "hello");
        assert_eq!(back.usage.total_tokens, 3);
    }
}
