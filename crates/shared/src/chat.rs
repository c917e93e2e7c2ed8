//! Chat data model shared between the engine and the shell.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role + content pair in the shape the completion endpoint expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system" | "user" | "assistant"
    pub content: String,
}

/// Token counts for one exchange, as reported by the server or estimated
/// locally while a stream is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A file excerpt attached to a user message via an `@title` mention.
/// The engine treats the content as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExcerpt {
    pub title: String,
    pub path: String,
    pub content: String,
}

/// A message in a chat session.
///
/// Exactly one message per session may have `streaming` set; its content
/// grows in place until the turn finalizes, after which the message is
/// never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FileExcerpt>,
}

impl Message {
    pub fn user(content: impl Into<String>, model: &str, attachments: Vec<FileExcerpt>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "user".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            model: Some(model.to_string()),
            usage: None,
            cost: None,
            streaming: false,
            attachments,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "system".to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            usage: None,
            cost: None,
            streaming: false,
            attachments: Vec::new(),
        }
    }

    /// Empty assistant message that a streaming turn fills in.
    pub fn assistant_placeholder(model: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "assistant".to_string(),
            content: String::new(),
            timestamp: Utc::now(),
            model: Some(model.to_string()),
            usage: None,
            cost: None,
            streaming: true,
            attachments: Vec::new(),
        }
    }
}

/// One unit of a streamed response after frame decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental text fragment. Never empty; empty fragments are
    /// filtered before emission.
    Text(String),
    /// Usage snapshot embedded in a frame. Arrives separately from any
    /// text the same frame carried.
    Usage(TokenUsage),
    /// The `[DONE]` sentinel or end of transport.
    Done,
    /// Transport failed after streaming had started.
    Error(String),
}
