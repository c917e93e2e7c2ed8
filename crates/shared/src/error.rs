//! Typed errors that terminate a chat turn.
//!
//! Per-frame decode failures and malformed command markup are recovered
//! internally and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or unusable API credential. Fatal to the turn; no retry.
    #[error("no usable OpenRouter API key configured")]
    Auth,

    /// Nothing to send: blank input and no prior conversation.
    #[error("conversation has no content to send")]
    EmptyConversation,

    /// Network failure or non-success status from the completion
    /// endpoint. Fatal to the turn; already-streamed text is kept.
    #[error("{0}")]
    Transport(String),

    /// The caller aborted an in-flight turn.
    #[error("turn aborted")]
    Aborted,
}

impl ChatError {
    /// Transport error from an HTTP status plus a response body snippet.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail: String = body.chars().take(800).collect();
        if detail.trim().is_empty() {
            ChatError::Transport(format!("openrouter error: {}", status))
        } else {
            ChatError::Transport(format!("openrouter error: {}\n{}", status, detail))
        }
    }
}
