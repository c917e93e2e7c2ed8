//! OpenRouter HTTP client: chat completions (single-shot and streamed)
//! and the model listing.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::chat::{ChatMessage, StreamChunk, TokenUsage};
use shared::ChatError;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::catalog::{ModelCatalog, ModelListing};
use crate::sse::SseParser;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_REFERER: &str = "app://finch";
const DEFAULT_TITLE: &str = "Finch";

/// OpenRouter keys carry this prefix.
pub const API_KEY_PREFIX: &str = "sk-or-";

// ── Request / response types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OpenRouterClient {
    http: Client,
    api_key: String,
    base_url: String,
    referer: String,
    app_title: String,
}

impl OpenRouterClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            app_title: DEFAULT_TITLE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_attribution(mut self, referer: Option<&str>, title: Option<&str>) -> Self {
        if let Some(referer) = referer {
            self.referer = referer.to_string();
        }
        if let Some(title) = title {
            self.app_title = title.to_string();
        }
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.app_title)
            .header("Content-Type", "application/json")
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
    }

    /// Single-shot completion for models without streaming support.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<(String, Option<TokenUsage>), ChatError> {
        let req = CompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
            stream: false,
        };
        let resp = self
            .post("/chat/completions")
            .json(&req)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::from_status(status, &body));
        }
        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok((text, body.usage))
    }

    /// Streamed completion. Decoded chunks go out over `tx` in arrival
    /// order, ending with `StreamChunk::Done`.
    ///
    /// Contract: failures before any bytes arrive return `Err`. Once
    /// streaming has started, a transport failure is reported as
    /// `StreamChunk::Error` and the method returns `Ok(())`.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<(), ChatError> {
        let req = CompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
            stream: true,
        };
        let resp = self
            .post("/chat/completions")
            .json(&req)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::from_status(status, &body));
        }

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for chunk in parser.feed(&bytes) {
                let done = chunk == StreamChunk::Done;
                let _ = tx.send(chunk);
                if done {
                    return Ok(());
                }
            }
        }

        // Transport closed without the sentinel: flush the carry-over,
        // then signal completion ourselves.
        debug!("stream closed without sentinel; flushing trailing buffer");
        for chunk in parser.finish() {
            let _ = tx.send(chunk);
        }
        let _ = tx.send(StreamChunk::Done);
        Ok(())
    }

    /// Fetch and normalize the model listing. The catalog is replaced
    /// wholesale by callers; nothing is merged.
    pub async fn list_models(&self) -> Result<ModelCatalog, ChatError> {
        let resp = self
            .get("/models")
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::from_status(status, &body));
        }
        let listing: ModelListing = resp
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(ModelCatalog::from_listing(listing))
    }

    /// Check whether a candidate key is usable: right prefix, and the
    /// model listing endpoint accepts it.
    pub async fn validate_key(key: &str) -> bool {
        if !key.trim().starts_with(API_KEY_PREFIX) {
            return false;
        }
        let client = OpenRouterClient::new(key.trim());
        client.list_models().await.is_ok()
    }
}
