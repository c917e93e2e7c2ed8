//! Settings file handling: a single JSON document in the platform
//! config directory.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use shared::settings::ChatSettings;
use std::fs;
use std::path::PathBuf;

pub fn config_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "Finch")
        .ok_or_else(|| anyhow!("could not determine config directory"))?;
    Ok(dirs.config_dir().to_path_buf())
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("settings.json"))
}

/// Load settings, falling back to defaults when the file is missing.
pub fn load() -> Result<ChatSettings> {
    load_from(&settings_path()?)
}

pub fn load_from(path: &PathBuf) -> Result<ChatSettings> {
    if !path.exists() {
        return Ok(ChatSettings::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing settings {}", path.display()))
}

pub fn save(settings: &ChatSettings) -> Result<()> {
    save_to(&settings_path()?, settings)
}

pub fn save_to(path: &PathBuf, settings: &ChatSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config dir {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw).with_context(|| format!("writing settings to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = ChatSettings::default();
        settings.api_key = Some("sk-or-test".to_string());
        settings.model = "google/gemini-pro-1.5".to_string();
        settings.temperature = 0.3;

        save_to(&path, &settings).unwrap();
        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.api_key.as_deref(), Some("sk-or-test"));
        assert_eq!(loaded.model, "google/gemini-pro-1.5");
        assert_eq!(loaded.temperature, 0.3);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.model, ChatSettings::default().model);
        assert!(loaded.api_key.is_none());
    }
}
