//! Wire types for the OpenAI-compatible chat completions API

use crate::segment::SegmentEvent;
use loom_core::{FinishReason, Message};
use serde::{Deserialize, Serialize};

/// Chat completions request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// One `data:` payload of a streamed chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Choice entry inside a streamed chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental content of a choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Segment events carried by the first choice of this chunk
    pub fn into_events(self) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if let Some(choice) = self.choices.into_iter().next() {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                events.push(SegmentEvent::Delta(content));
            }
            if let Some(reason) = choice.finish_reason {
                events.push(SegmentEvent::Finish(FinishReason::from_provider(&reason)));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "test-model".to_string(),
            messages: vec![Message::system("be brief"), Message::user("hello")],
            max_tokens: 8192,
            temperature: 0.7,
            stream: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_chunk_with_content() {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#)
                .unwrap();
        let events = chunk.into_events();
        assert_eq!(events, vec![SegmentEvent::Delta("Hi".to_string())]);
    }

    #[test]
    fn test_chunk_with_finish_reason() {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"length"}]}"#)
                .unwrap();
        let events = chunk.into_events();
        assert_eq!(events, vec![SegmentEvent::Finish(FinishReason::Length)]);
    }

    #[test]
    fn test_chunk_without_choices() {
        let chunk: ChatCompletionChunk = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(chunk.into_events().is_empty());
    }
}
