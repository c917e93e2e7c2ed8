//! Finch: terminal chat client for OpenRouter models.
//!
//! All the interesting machinery lives in the `providers` crate; this
//! shell just wires it to stdin/stdout and a settings file.

use anyhow::Result;
use futures::future::AbortHandle;
use providers::catalog::ModelCatalog;
use providers::commands;
use providers::export;
use providers::openrouter::OpenRouterClient;
use providers::session::{ChatSession, SessionEvent, TurnState};
use shared::collab::{CommandEvent, CredentialProvider, KeyValueStore, Notifier};
use shared::settings::ChatSettings;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

mod settings;

/// API key from the settings file, or the environment as a fallback.
struct SettingsCredentials {
    api_key: Option<String>,
}

impl SettingsCredentials {
    fn new(settings: &ChatSettings) -> Self {
        let api_key = settings
            .api_key
            .clone()
            .or_else(|| env::var("OPENROUTER_API_KEY").ok());
        Self { api_key }
    }
}

impl CredentialProvider for SettingsCredentials {
    fn api_key(&self) -> Option<String> {
        self.api_key.clone()
    }
}

/// JSON-file key/value store next to the settings file. Used by the
/// engine for model-recency tracking.
struct FileStore {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileStore {
    fn open(path: PathBuf) -> Self {
        let map = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            map: Mutex::new(map),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(map) {
            Ok(raw) => {
                if let Err(e) = fs::write(&self.path, raw) {
                    warn!("could not persist store: {}", e);
                }
            }
            Err(e) => warn!("could not serialize store: {}", e),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.map.lock().unwrap();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map);
    }
}

/// Prints model suggestions instead of popping dialogs.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, event: CommandEvent) {
        match event {
            CommandEvent::RenameChat { new_name } => {
                println!("  [the model suggests renaming this chat to \"{}\"]", new_name)
            }
            CommandEvent::SetTopic { topic } => {
                println!("  [the model set the topic to \"{}\"]", topic)
            }
            CommandEvent::Highlight { text } => println!("  [highlight: \"{}\"]", text),
            CommandEvent::Search { query } => {
                println!("  [the model suggests searching for \"{}\"]", query)
            }
            CommandEvent::CreateThread { name } => {
                println!("  [the model suggests a new thread \"{}\"]", name)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = settings::load().unwrap_or_else(|e| {
        warn!("could not load settings, using defaults: {}", e);
        ChatSettings::default()
    });

    let credentials = Arc::new(SettingsCredentials::new(&settings));
    let store = Arc::new(FileStore::open(settings::config_dir()?.join("store.json")));
    let notifier = Arc::new(TerminalNotifier);

    let catalog = match credentials.api_key() {
        Some(key) => match OpenRouterClient::new(&key).list_models().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("could not fetch model catalog: {}", e);
                ModelCatalog::default()
            }
        },
        None => {
            println!("No API key configured. Use `/key sk-or-...` or set OPENROUTER_API_KEY.");
            ModelCatalog::default()
        }
    };

    let mut session = ChatSession::new(&settings, catalog, credentials, store, notifier);
    session.push_system_message(commands::append_commands_prompt(
        "You are Finch, a concise and helpful assistant.",
    ));

    println!("Finch, chatting with {}. Type /help for commands.", session.model);

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = stdin.lock().lines().next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if !run_command(command, &mut session).await? {
                break;
            }
            continue;
        }

        run_turn(&mut session, input).await;
    }

    Ok(())
}

async fn run_turn(session: &mut ChatSession, input: &str) {
    let (_abort, registration) = AbortHandle::new_pair();
    let result = session
        .send_message(input, Vec::new(), registration, |event| match event {
            SessionEvent::Token(token) => {
                print!("{}", token);
                let _ = io::stdout().flush();
            }
            SessionEvent::State(TurnState::Complete) | SessionEvent::State(TurnState::Errored) => {
                println!();
            }
            SessionEvent::State(_) => {}
        })
        .await;

    match result {
        Ok(()) => {
            if let Some(last) = session.messages.last() {
                if let (Some(usage), Some(cost)) = (&last.usage, last.cost) {
                    println!("  [{} tokens, ${:.4}]", usage.total_tokens, cost);
                }
            }
        }
        Err(e) => eprintln!("error: {}", e),
    }
}

/// Returns false when the loop should exit.
async fn run_command(command: &str, session: &mut ChatSession) -> Result<bool> {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "help" => {
            println!("  /models           list models (recently used first)");
            println!("  /model <id>       switch model");
            println!("  /key <sk-or-...>  validate and save an API key");
            println!("  /stats            session token and cost totals");
            println!("  /export <path>    write the chat as markdown");
            println!("  /clear            start a fresh conversation");
            println!("  /quit             exit");
        }
        "models" => {
            for model in session.ranked_models().iter().take(15) {
                println!(
                    "  {:<44} {:>7} ctx  ${:.2}/M in  ${:.2}/M out",
                    model.id, model.context_length, model.prompt_price, model.completion_price
                );
            }
        }
        "model" => {
            if session.set_model(arg) {
                println!("  model set to {}", session.model_name());
            } else {
                println!("  unknown model: {}", arg);
            }
        }
        "key" => {
            if OpenRouterClient::validate_key(arg).await {
                let mut settings = settings::load().unwrap_or_default();
                settings.api_key = Some(arg.to_string());
                settings::save(&settings)?;
                println!("  key saved; restart to pick it up");
            } else {
                println!("  key rejected (must be a valid sk-or-... key)");
            }
        }
        "stats" => {
            let stats = session.stats();
            println!(
                "  {} messages, {} prompt + {} completion tokens, ${:.4}",
                stats.total_messages, stats.prompt_tokens, stats.completion_tokens, stats.cost
            );
        }
        "export" => {
            if arg.is_empty() {
                println!("  usage: /export <path>");
            } else {
                fs::write(arg, export::session_markdown(session))?;
                println!("  exported to {}", arg);
            }
        }
        "clear" => {
            session.clear();
            session.push_system_message(commands::append_commands_prompt(
                "You are Finch, a concise and helpful assistant.",
            ));
            println!("  conversation cleared");
        }
        "quit" | "exit" => return Ok(false),
        _ => println!("  unknown command: /{}", name),
    }
    Ok(true)
}
