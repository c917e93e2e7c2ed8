pub mod chat;
pub mod collab;
pub mod error;

pub use error::ChatError;

pub mod settings {
    use serde::{Deserialize, Serialize};

    fn default_temperature() -> f32 {
        0.7
    }

    fn default_max_tokens() -> Option<u32> {
        Some(1000)
    }

    fn default_model() -> String {
        "anthropic/claude-3.5-sonnet:beta".to_string()
    }

    /// Settings the chat engine needs to run a turn. The shell owns
    /// persistence; the engine only reads these.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatSettings {
        /// OpenRouter API key (`sk-or-...`). `None` falls back to the
        /// `OPENROUTER_API_KEY` environment variable.
        pub api_key: Option<String>,
        #[serde(default = "default_model")]
        pub model: String,
        #[serde(default = "default_temperature")]
        pub temperature: f32,
        #[serde(default = "default_max_tokens")]
        pub max_tokens: Option<u32>,
        /// Sent as the `HTTP-Referer` header, which OpenRouter uses for
        /// app attribution.
        #[serde(default)]
        pub referer: Option<String>,
        #[serde(default)]
        pub app_title: Option<String>,
    }

    impl Default for ChatSettings {
        fn default() -> Self {
            Self {
                api_key: None,
                model: default_model(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                referer: None,
                app_title: None,
            }
        }
    }
}
