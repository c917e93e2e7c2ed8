//! Render a chat session to a markdown document with a YAML frontmatter
//! header, suitable for dropping into a notes vault.

use chrono::Utc;
use shared::chat::Message;

use crate::session::ChatSession;

/// Build the export document for a whole session.
pub fn session_markdown(session: &ChatSession) -> String {
    let mut lines: Vec<String> = Vec::new();
    let stats = session.stats();

    let title: String = session
        .messages
        .first()
        .map(|m| m.content.chars().take(50).collect())
        .unwrap_or_default();

    lines.push("---".to_string());
    lines.push(format!("title: \"{}...\"", title));
    lines.push(format!("date: {}", Utc::now().to_rfc3339()));
    lines.push(format!("model: {}", session.model_name()));
    lines.push("stats:".to_string());
    lines.push(format!(
        "  total_tokens: {}",
        stats.prompt_tokens + stats.completion_tokens
    ));
    lines.push(format!("  prompt_tokens: {}", stats.prompt_tokens));
    lines.push(format!("  completion_tokens: {}", stats.completion_tokens));
    lines.push(format!("  cost: {:.4}", stats.cost));
    lines.push(format!("messages_count: {}", session.messages.len()));
    lines.push(format!("temperature: {}", session.temperature));
    lines.push("models_used:".to_string());
    let mut seen: Vec<&str> = Vec::new();
    for message in &session.messages {
        if let Some(model) = &message.model {
            if !seen.contains(&model.as_str()) {
                seen.push(model);
                lines.push(format!("  - {}", model));
            }
        }
    }
    lines.push("---".to_string());
    lines.push(String::new());

    for message in &session.messages {
        render_message(&mut lines, message);
    }

    lines.join("\n")
}

fn render_message(lines: &mut Vec<String>, message: &Message) {
    let role = if message.role == "user" {
        "👤 User"
    } else {
        "🤖 Assistant"
    };
    let timestamp = message.timestamp.to_rfc3339();

    lines.push(format!("### {} ({})", role, timestamp));
    lines.push(String::new());
    lines.push(message.content.clone());
    lines.push(String::new());
    lines.push("<details><summary>Message Metadata</summary>".to_string());
    lines.push(String::new());
    lines.push("```yaml".to_string());
    lines.push(format!("role: {}", message.role));
    if let Some(model) = &message.model {
        lines.push(format!("model: {}", model));
    }
    lines.push(format!("timestamp: {}", timestamp));
    if let Some(usage) = &message.usage {
        lines.push("tokens:".to_string());
        lines.push(format!("  prompt: {}", usage.prompt_tokens));
        lines.push(format!("  completion: {}", usage.completion_tokens));
        lines.push(format!("  total: {}", usage.total_tokens));
    }
    if let Some(cost) = message.cost {
        lines.push(format!("cost: {:.4}", cost));
    }
    lines.push("```".to_string());
    lines.push("</details>".to_string());
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelCatalog, ModelDescriptor};
    use shared::chat::TokenUsage;
    use shared::collab::{CommandEvent, CredentialProvider, KeyValueStore, Notifier};
    use shared::settings::ChatSettings;
    use std::sync::Arc;

    struct NoKey;
    impl CredentialProvider for NoKey {
        fn api_key(&self) -> Option<String> {
            None
        }
    }

    struct NullStore;
    impl KeyValueStore for NullStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn set(&self, _key: &str, _value: &str) {}
    }

    struct NullNotifier;
    impl Notifier for NullNotifier {
        fn notify(&self, _event: CommandEvent) {}
    }

    fn session_with_history() -> ChatSession {
        let catalog = ModelCatalog::new(vec![ModelDescriptor {
            id: "anthropic/claude-3.5-sonnet:beta".to_string(),
            name: "Claude 3.5 Sonnet".to_string(),
            context_length: 200_000,
            prompt_price: 3.0,
            completion_price: 15.0,
            supports_vision: false,
            supports_tools: false,
            supports_streaming: true,
            provider: "anthropic".to_string(),
        }]);
        let mut session = ChatSession::new(
            &ChatSettings::default(),
            catalog,
            Arc::new(NoKey),
            Arc::new(NullStore),
            Arc::new(NullNotifier),
        );
        let mut user = Message::user("What's the capital of France?", &session.model, Vec::new());
        user.usage = Some(TokenUsage::new(10, 0));
        user.cost = Some(0.00003);
        session.messages.push(user);
        let mut assistant = Message::assistant_placeholder(&session.model.clone());
        assistant.content = "Paris.".to_string();
        assistant.streaming = false;
        assistant.usage = Some(TokenUsage::new(0, 3));
        assistant.cost = Some(0.000045);
        session.messages.push(assistant);
        session
    }

    #[test]
    fn test_export_has_frontmatter_and_messages() {
        let session = session_with_history();
        let markdown = session_markdown(&session);

        assert!(markdown.starts_with("---\ntitle: \"What's the capital of France?...\""));
        assert!(markdown.contains("model: Claude 3.5 Sonnet"));
        assert!(markdown.contains("messages_count: 2"));
        assert!(markdown.contains("models_used:\n  - anthropic/claude-3.5-sonnet:beta"));
        assert!(markdown.contains("### 👤 User"));
        assert!(markdown.contains("### 🤖 Assistant"));
        assert!(markdown.contains("Paris."));
        assert!(markdown.contains("  prompt: 10"));
        assert!(markdown.contains("  completion: 3"));
    }

    #[test]
    fn test_export_lists_each_model_once() {
        let session = session_with_history();
        let markdown = session_markdown(&session);
        let occurrences = markdown
            .matches("  - anthropic/claude-3.5-sonnet:beta")
            .count();
        assert_eq!(occurrences, 1);
    }
}
