//! One chat session and its turn state machine.
//!
//! A session owns the message list and runs one network exchange at a
//! time. During a turn exactly one message (the assistant placeholder)
//! is mutable; everything else is append-only history.

use futures::future::{AbortRegistration, Abortable, Aborted};
use shared::chat::{ChatMessage, FileExcerpt, Message, StreamChunk, TokenUsage};
use shared::collab::{CredentialProvider, KeyValueStore, Notifier};
use shared::settings::ChatSettings;
use shared::ChatError;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::catalog::{self, ModelCatalog, ModelDescriptor};
use crate::commands;
use crate::openrouter::OpenRouterClient;
use crate::pricing::{self, ChatStats, StreamingEstimate};

/// Turn lifecycle. `Errored` is terminal for the turn; the session
/// itself can always start another turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Complete,
    Errored,
}

/// What the caller's callback sees while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(TurnState),
    /// One decoded fragment, in arrival order. Concatenating every
    /// `Token` payload reproduces the raw assistant reply exactly.
    Token(String),
}

pub struct ChatSession {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    state: TurnState,
    stats: ChatStats,
    catalog: ModelCatalog,
    referer: Option<String>,
    app_title: Option<String>,
    credentials: Arc<dyn CredentialProvider>,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
}

impl ChatSession {
    pub fn new(
        settings: &ChatSettings,
        catalog: ModelCatalog,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            messages: Vec::new(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            state: TurnState::Idle,
            stats: ChatStats::default(),
            catalog,
            referer: settings.referer.clone(),
            app_title: settings.app_title.clone(),
            credentials,
            store,
            notifier,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn stats(&self) -> ChatStats {
        self.stats
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Replace the catalog wholesale (e.g. after a credential change).
    pub fn set_catalog(&mut self, catalog: ModelCatalog) {
        self.catalog = catalog;
    }

    /// Switch models. Ids the catalog does not know are rejected.
    pub fn set_model(&mut self, id: &str) -> bool {
        if self.catalog.get(id).is_some() {
            self.model = id.to_string();
            true
        } else {
            false
        }
    }

    pub fn model_name(&self) -> String {
        self.catalog
            .get(&self.model)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "Unknown Model".to_string())
    }

    /// Models ordered for the picker: recently used first.
    pub fn ranked_models(&self) -> Vec<&ModelDescriptor> {
        let recent = catalog::load_recent_models(self.store.as_ref());
        self.catalog.ranked(&recent)
    }

    pub fn push_system_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.stats = ChatStats::default();
        self.state = TurnState::Idle;
    }

    /// Run one turn: append the user message and a streaming assistant
    /// placeholder, exchange with the model, and finalize accounting and
    /// commands. `abort` cancels the exchange mid-flight; an aborted
    /// turn keeps whatever text already streamed and skips finalization.
    pub async fn send_message<F>(
        &mut self,
        text: &str,
        attachments: Vec<FileExcerpt>,
        abort: AbortRegistration,
        mut on_event: F,
    ) -> Result<(), ChatError>
    where
        F: FnMut(SessionEvent),
    {
        let trimmed = text.trim();
        self.set_state(TurnState::Sending, &mut on_event);

        let key = match self.credentials.api_key().filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => {
                self.set_state(TurnState::Errored, &mut on_event);
                return Err(ChatError::Auth);
            }
        };
        if trimmed.is_empty() {
            self.set_state(TurnState::Errored, &mut on_event);
            return Err(ChatError::EmptyConversation);
        }

        let client = OpenRouterClient::new(&key)
            .with_attribution(self.referer.as_deref(), self.app_title.as_deref());

        self.messages
            .push(Message::user(trimmed, &self.model, attachments));
        let wire = self.wire_history();
        self.messages
            .push(Message::assistant_placeholder(&self.model));
        let assistant_idx = self.messages.len() - 1;

        let supports_streaming = self
            .catalog
            .get(&self.model)
            .map_or(true, |m| m.supports_streaming);

        let prompt_chars: usize = wire.iter().map(|m| m.content.chars().count()).sum();
        let mut estimate = StreamingEstimate::new(prompt_chars);
        let authoritative: Option<TokenUsage>;

        if supports_streaming {
            self.set_state(TurnState::Streaming, &mut on_event);

            let (tx, mut rx) = mpsc::unbounded_channel();
            let streamer = tokio::spawn({
                let client = client.clone();
                let model = self.model.clone();
                let wire = wire.clone();
                let temperature = self.temperature;
                let max_tokens = self.max_tokens;
                async move {
                    client
                        .chat_stream(&model, &wire, temperature, max_tokens, tx)
                        .await
                }
            });

            let outcome = {
                let message = &mut self.messages[assistant_idx];
                let estimate = &mut estimate;
                let events = &mut on_event;
                let pump = async move {
                    let mut usage = None;
                    while let Some(chunk) = rx.recv().await {
                        match chunk {
                            StreamChunk::Text(token) => {
                                estimate.fragments += 1;
                                message.content.push_str(&token);
                                events(SessionEvent::Token(token));
                            }
                            StreamChunk::Usage(snapshot) => usage = Some(snapshot),
                            StreamChunk::Done => return Ok(usage),
                            StreamChunk::Error(e) => return Err(ChatError::Transport(e)),
                        }
                    }
                    Ok(usage)
                };
                Abortable::new(pump, abort).await
            };

            match outcome {
                Err(Aborted) => {
                    streamer.abort();
                    self.fail_turn(assistant_idx, &mut on_event);
                    return Err(ChatError::Aborted);
                }
                Ok(Err(e)) => {
                    streamer.abort();
                    self.fail_turn(assistant_idx, &mut on_event);
                    return Err(e);
                }
                Ok(Ok(usage)) => {
                    // The channel closing without a sentinel means the
                    // request itself failed; surface that error.
                    match streamer.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            self.fail_turn(assistant_idx, &mut on_event);
                            return Err(e);
                        }
                        Err(e) => {
                            self.fail_turn(assistant_idx, &mut on_event);
                            return Err(ChatError::Transport(e.to_string()));
                        }
                    }
                    authoritative = usage;
                }
            }
        } else {
            // Model cannot stream: one synchronous exchange, then
            // straight to finalizing.
            let request = client.chat(&self.model, &wire, self.temperature, self.max_tokens);
            match Abortable::new(request, abort).await {
                Err(Aborted) => {
                    self.fail_turn(assistant_idx, &mut on_event);
                    return Err(ChatError::Aborted);
                }
                Ok(Err(e)) => {
                    self.fail_turn(assistant_idx, &mut on_event);
                    return Err(e);
                }
                Ok(Ok((content, usage))) => {
                    if !content.is_empty() {
                        estimate.fragments = 1;
                        self.messages[assistant_idx].content = content.clone();
                        on_event(SessionEvent::Token(content));
                    }
                    authoritative = usage;
                }
            }
        }

        self.finalize_turn(assistant_idx, &estimate, authoritative, &mut on_event);
        Ok(())
    }

    /// Messages in wire shape, with `@title` mentions expanded to carry
    /// the attached file content.
    fn wire_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: if m.attachments.is_empty() {
                    m.content.clone()
                } else {
                    expand_mentions(&m.content, &m.attachments)
                },
            })
            .collect()
    }

    fn finalize_turn<F>(
        &mut self,
        assistant_idx: usize,
        estimate: &StreamingEstimate,
        authoritative: Option<TokenUsage>,
        on_event: &mut F,
    ) where
        F: FnMut(SessionEvent),
    {
        self.set_state(TurnState::Finalizing, on_event);

        // The local estimate only stands in until the server reports
        // real counts.
        let usage = authoritative.unwrap_or_else(|| estimate.usage());

        // Prompt tokens are booked on the user message, completion
        // tokens on the assistant reply.
        let prompt_usage = TokenUsage::new(usage.prompt_tokens, 0);
        let completion_usage = TokenUsage::new(0, usage.completion_tokens);
        let prompt_cost = pricing::cost_for_model(&self.catalog, &self.model, &prompt_usage);
        let completion_cost =
            pricing::cost_for_model(&self.catalog, &self.model, &completion_usage);

        if assistant_idx > 0 {
            let user = &mut self.messages[assistant_idx - 1];
            user.usage = Some(prompt_usage);
            user.cost = Some(prompt_cost);
        }

        let parsed = commands::parse_model_commands(&self.messages[assistant_idx].content);
        {
            let assistant = &mut self.messages[assistant_idx];
            assistant.content = parsed.visible_text.clone();
            assistant.usage = Some(completion_usage);
            assistant.cost = Some(completion_cost);
            assistant.streaming = false;
        }
        commands::process_commands(&parsed, self.notifier.as_ref());
        catalog::record_model_use(self.store.as_ref(), &self.model);
        self.stats = pricing::recalculate_stats(&self.messages, &self.catalog);

        self.set_state(TurnState::Complete, on_event);
    }

    /// Terminal failure path: already-streamed text stays visible, the
    /// streaming flag clears, and no finalizing side effects run.
    fn fail_turn<F>(&mut self, assistant_idx: usize, on_event: &mut F)
    where
        F: FnMut(SessionEvent),
    {
        if let Some(message) = self.messages.get_mut(assistant_idx) {
            message.streaming = false;
        }
        self.set_state(TurnState::Errored, on_event);
    }

    fn set_state<F>(&mut self, state: TurnState, on_event: &mut F)
    where
        F: FnMut(SessionEvent),
    {
        self.state = state;
        on_event(SessionEvent::State(state));
    }
}

/// Expand each `@title` mention with a fenced block of the excerpt
/// content, the way the composer embeds attached files on the wire. The
/// stored message keeps the raw text; only the outgoing copy grows.
pub fn expand_mentions(text: &str, files: &[FileExcerpt]) -> String {
    let mut out = text.to_string();
    for file in files {
        let needle = format!("@{}", file.title);
        let mut search_from = 0;
        while let Some(off) = out[search_from..].find(&needle) {
            let pos = search_from + off;
            let end = pos + needle.len();
            let at_boundary = out[end..]
                .chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
            if at_boundary {
                let replacement = format!(
                    "@{}\n\nContent of {}:\n```\n{}\n```\n\n",
                    file.title, file.title, file.content
                );
                out.replace_range(pos..end, &replacement);
                break;
            }
            search_from = end;
        }
    }
    out
}
