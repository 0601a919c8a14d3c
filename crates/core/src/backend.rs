//! Backend client trait: the abstraction over the AI backend protocol.
//!
//! The protocol clients themselves live outside this workspace. Beacon only
//! needs a stream of chunks it can wrap with the circuit breaker and the
//! degradation manager.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextRecord;
use crate::error::Error;

/// A request to the AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// The user-facing prompt
    pub prompt: String,

    /// Situational context gathered for this request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextRecord>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
            max_tokens: None,
        }
    }

    pub fn with_context(mut self, context: Vec<ContextRecord>) -> Self {
        self.context = context;
        self
    }
}

/// A single chunk in a streaming backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    ContentDelta { text: String },
    ToolUseStart { id: String, name: String },
    ToolUseDelta { id: String, partial_json: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    Error { message: String },
}

/// A tool invocation requested by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A fully collected backend response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// The core BackendClient trait.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// A human-readable name for this backend (e.g., "anthropic", "local").
    fn name(&self) -> &str;

    /// Send a request and get a stream of response chunks.
    async fn stream(
        &self,
        request: BackendRequest,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, Error>>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_chunk_is_tagged() {
        let chunk = StreamChunk::ContentDelta { text: "hi".into() };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains(r#""type":"content_delta""#));

        let parsed: StreamChunk = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
        assert_eq!(parsed, StreamChunk::Complete { stop_reason: None });
    }
}
