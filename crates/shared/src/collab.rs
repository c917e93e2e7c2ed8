//! Collaborator traits the engine consumes. The shell supplies the
//! implementations; the engine never does its own key storage,
//! persistence, or user-facing notification.

use serde::{Deserialize, Serialize};

/// Supplies the current API credential, if one is configured.
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Minimal string get/set persistence. The engine uses it only for
/// model-recency tracking.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// An action a model requested through an embedded command tag. All of
/// these are suggestions; the shell decides whether and how to act.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandEvent {
    RenameChat { new_name: String },
    SetTopic { topic: String },
    Highlight { text: String },
    Search { query: String },
    CreateThread { name: String },
}

/// Receives command events extracted from finished assistant replies.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: CommandEvent);
}
