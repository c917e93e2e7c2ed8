//! Model command extraction.
//!
//! Models can embed self-closing command tags in their replies to
//! suggest app actions, e.g. `<rename-chat newname="Trip Planning" />`.
//! The vocabulary is closed: only the five tags below are recognized.
//! Recognized tags are stripped from the text shown to the user;
//! anything malformed is left in place and ignored.

use shared::collab::{CommandEvent, Notifier};
use std::collections::HashMap;
use tracing::debug;

/// The closed command vocabulary.
pub const COMMAND_TAGS: [&str; 5] = [
    "rename-chat",
    "set-topic",
    "highlight",
    "search",
    "create-thread",
];

/// A recognized command tag with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub attributes: HashMap<String, String>,
}

impl ParsedCommand {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }
}

/// Result of scanning one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommands {
    pub commands: Vec<ParsedCommand>,
    /// Convenience copy of a rename command's `newname` attribute, kept
    /// for hosts that predate the command list.
    pub rename: Option<String>,
    /// The reply with every recognized tag's literal markup removed,
    /// whitespace-trimmed.
    pub visible_text: String,
}

/// Scan `content` for command tags. Never fails: text without tags (or
/// with only malformed ones) comes back unchanged with zero commands.
pub fn parse_model_commands(content: &str) -> ParsedCommands {
    let mut commands = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    if content.contains('<') {
        let bytes = content.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match content[i..].find('<') {
                Some(off) => {
                    let pos = i + off;
                    match parse_tag(&content[pos..]) {
                        Some((command, len)) => {
                            commands.push(command);
                            spans.push((pos, pos + len));
                            i = pos + len;
                        }
                        None => i = pos + 1,
                    }
                }
                None => break,
            }
        }
    }

    let visible_text = if spans.is_empty() {
        content.to_string()
    } else {
        let mut kept = String::with_capacity(content.len());
        let mut last = 0;
        for &(start, end) in &spans {
            kept.push_str(&content[last..start]);
            last = end;
        }
        kept.push_str(&content[last..]);
        kept.trim().to_string()
    };

    let rename = commands
        .iter()
        .find(|c| c.name == "rename-chat")
        .and_then(|c| c.attr("newname"))
        .map(|s| s.to_string());

    if !commands.is_empty() {
        debug!("model reply carried {} command tag(s)", commands.len());
    }

    ParsedCommands {
        commands,
        rename,
        visible_text,
    }
}

/// Try to parse one self-closing command tag at the start of `s` (which
/// begins with `<`). Returns the command and the byte length of its
/// literal markup, or `None` if this is not a well-formed command tag.
fn parse_tag(s: &str) -> Option<(ParsedCommand, usize)> {
    let rest = &s[1..];
    let name = COMMAND_TAGS.iter().find(|tag| {
        rest.starts_with(**tag)
            && matches!(
                rest[tag.len()..].chars().next(),
                Some(c) if c.is_whitespace() || c == '/'
            )
    })?;

    let mut attributes = HashMap::new();
    let mut chars = rest[name.len()..].char_indices().peekable();
    loop {
        // Skip whitespace between attributes.
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        let (pos, c) = *chars.peek()?;
        if c == '/' {
            chars.next();
            return match chars.next() {
                Some((end, '>')) => {
                    let len = 1 + name.len() + end + 1;
                    Some((
                        ParsedCommand {
                            name: name.to_string(),
                            attributes,
                        },
                        len,
                    ))
                }
                _ => None,
            };
        }
        if c == '<' || c == '>' {
            // Opening tags without `/>` are not commands.
            return None;
        }

        // Attribute name.
        let key_start = pos;
        let mut key_end = pos;
        while matches!(
            chars.peek(),
            Some((_, c)) if c.is_alphanumeric() || *c == '-' || *c == '_'
        ) {
            let (p, c) = chars.next().unwrap();
            key_end = p + c.len_utf8();
        }
        if key_end == key_start {
            return None;
        }
        let key = &rest[name.len()..][key_start..key_end];

        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some((_, '=')) => {}
            _ => return None,
        }
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }

        // Quoted value.
        let quote = match chars.next() {
            Some((_, c @ ('"' | '\''))) => c,
            _ => return None,
        };
        let value_start = chars.peek()?.0;
        let mut value_end = None;
        for (p, c) in chars.by_ref() {
            if c == quote {
                value_end = Some(p);
                break;
            }
        }
        let value_end = value_end?;
        let value = &rest[name.len()..][value_start..value_end];
        attributes.insert(key.to_string(), value.to_string());
    }
}

/// Forward each recognized command to the notification collaborator.
/// Commands with a missing or empty payload attribute are dropped. A
/// bare `rename` result with no rename command in the list is honored
/// for older command producers.
pub fn process_commands(parsed: &ParsedCommands, notifier: &dyn Notifier) {
    let mut saw_rename = false;
    for command in &parsed.commands {
        let event = match command.name.as_str() {
            "rename-chat" => command.attr("newname").map(|v| {
                saw_rename = true;
                CommandEvent::RenameChat {
                    new_name: v.to_string(),
                }
            }),
            "set-topic" => command.attr("topic").map(|v| CommandEvent::SetTopic {
                topic: v.to_string(),
            }),
            "highlight" => command.attr("text").map(|v| CommandEvent::Highlight {
                text: v.to_string(),
            }),
            "search" => command.attr("query").map(|v| CommandEvent::Search {
                query: v.to_string(),
            }),
            "create-thread" => command.attr("name").map(|v| CommandEvent::CreateThread {
                name: v.to_string(),
            }),
            _ => None,
        };
        match event {
            Some(event) if !event_payload_is_empty(&event) => notifier.notify(event),
            _ => {}
        }
    }

    if !saw_rename {
        if let Some(new_name) = &parsed.rename {
            if !new_name.is_empty() {
                notifier.notify(CommandEvent::RenameChat {
                    new_name: new_name.clone(),
                });
            }
        }
    }
}

fn event_payload_is_empty(event: &CommandEvent) -> bool {
    let payload = match event {
        CommandEvent::RenameChat { new_name } => new_name,
        CommandEvent::SetTopic { topic } => topic,
        CommandEvent::Highlight { text } => text,
        CommandEvent::Search { query } => query,
        CommandEvent::CreateThread { name } => name,
    };
    payload.is_empty()
}

/// System-prompt paragraph teaching the model the command vocabulary.
pub fn commands_prompt() -> &'static str {
    r#"## Command tags

You can use command tags in your responses to suggest actions in the application. They are parsed and removed from your response before it is shown to the user.

Available commands:

1. <rename-chat newname="Suggested Title" /> - Suggest a better name for the current chat
2. <set-topic topic="Topic Name" /> - Set a topic for the current chat
3. <highlight text="Important text" /> - Highlight important text for the user
4. <search query="Search query" /> - Suggest a search query
5. <create-thread name="Thread Name" /> - Suggest creating a new thread

Notes:
- Commands should be used sparingly and only when they add value
- All suggested actions require user approval
- Focus on providing helpful responses first, commands second
- Invalid markup will be ignored and shown to the user as-is"#
}

/// Append the command vocabulary to a system message.
pub fn append_commands_prompt(system_message: &str) -> String {
    format!("{}\n\n{}", system_message, commands_prompt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<CommandEvent>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: CommandEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_plain_text_passes_through() {
        let parsed = parse_model_commands("Just a normal reply. 2 < 3, by the way.");
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.visible_text, "Just a normal reply. 2 < 3, by the way.");
        assert!(parsed.rename.is_none());
    }

    #[test]
    fn test_rename_command_extracted_and_stripped() {
        let parsed = parse_model_commands(
            "<rename-chat newname=\"Trip Planning\" />\nHere is your itinerary.",
        );
        assert_eq!(parsed.commands.len(), 1);
        assert_eq!(parsed.commands[0].name, "rename-chat");
        assert_eq!(parsed.commands[0].attr("newname"), Some("Trip Planning"));
        assert_eq!(parsed.rename.as_deref(), Some("Trip Planning"));
        assert_eq!(parsed.visible_text, "Here is your itinerary.");
    }

    #[test]
    fn test_mixed_commands_in_one_reply() {
        let parsed = parse_model_commands(
            "<set-topic topic=\"Rust\" /> Some prose. <search query=\"borrow checker\"/> More prose.",
        );
        assert_eq!(parsed.commands.len(), 2);
        assert_eq!(parsed.commands[0].attr("topic"), Some("Rust"));
        assert_eq!(parsed.commands[1].attr("query"), Some("borrow checker"));
        assert_eq!(parsed.visible_text, "Some prose.  More prose.");
    }

    #[test]
    fn test_malformed_markup_left_untouched() {
        let content = "Reply with <rename-chat newname=\"oops\" and no close";
        let parsed = parse_model_commands(content);
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.visible_text, content);
    }

    #[test]
    fn test_unknown_tags_left_untouched() {
        let content = "<blink speed=\"fast\" /> hello";
        let parsed = parse_model_commands(content);
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.visible_text, content);
    }

    #[test]
    fn test_non_self_closing_tag_not_recognized() {
        let content = "<highlight text=\"x\">not a command</highlight>";
        let parsed = parse_model_commands(content);
        assert!(parsed.commands.is_empty());
        assert_eq!(parsed.visible_text, content);
    }

    #[test]
    fn test_single_quoted_attributes() {
        let parsed = parse_model_commands("<create-thread name='Side quest' /> ok");
        assert_eq!(parsed.commands.len(), 1);
        assert_eq!(parsed.commands[0].attr("name"), Some("Side quest"));
        assert_eq!(parsed.visible_text, "ok");
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let parsed = parse_model_commands(
            "<rename-chat newname=\"Once\" />\n<highlight text=\"hi\" />\nBody text.",
        );
        let again = parse_model_commands(&parsed.visible_text);
        assert!(again.commands.is_empty());
        assert_eq!(again.visible_text, parsed.visible_text);
    }

    #[test]
    fn test_process_commands_emits_events() {
        let notifier = RecordingNotifier::default();
        let parsed = parse_model_commands(
            "<rename-chat newname=\"New Name\" /><set-topic topic=\"Travel\" /><highlight text=\"now\" /> done",
        );
        process_commands(&parsed, &notifier);
        let events = notifier.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                CommandEvent::RenameChat {
                    new_name: "New Name".to_string()
                },
                CommandEvent::SetTopic {
                    topic: "Travel".to_string()
                },
                CommandEvent::Highlight {
                    text: "now".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_legacy_rename_fallback() {
        let notifier = RecordingNotifier::default();
        // An older producer that only fills the rename field.
        let parsed = ParsedCommands {
            commands: Vec::new(),
            rename: Some("Old Style".to_string()),
            visible_text: "body".to_string(),
        };
        process_commands(&parsed, &notifier);
        let events = notifier.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![CommandEvent::RenameChat {
                new_name: "Old Style".to_string()
            }]
        );
    }

    #[test]
    fn test_commands_prompt_appended() {
        let combined = append_commands_prompt("You are helpful.");
        assert!(combined.starts_with("You are helpful."));
        assert!(combined.contains("<rename-chat"));
    }
}
