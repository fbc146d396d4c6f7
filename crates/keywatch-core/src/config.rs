use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Channel, ChatId, SoundMapping},
    errors::Error,
    Result,
};

/// Sounds shipped with the desktop shell. The resolver itself accepts any
/// identifier; this list only feeds the settings UI.
pub const AVAILABLE_SOUNDS: &[&str] = &["beep-10.mp3", "button-20.mp3"];

const DEFAULT_SOUND: &str = "beep-10.mp3";
const DEFAULT_MESSAGE_LIMIT: usize = 10;

/// Process configuration: the Telegram API identity plus file locations.
/// Loaded once at startup; read-only afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub settings_file: PathBuf,
    pub session_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let api_id = env_str("TELEGRAM_API_ID")
            .and_then(|s| s.trim().parse::<i32>().ok())
            .ok_or_else(|| {
                Error::Config("TELEGRAM_API_ID environment variable is required".to_string())
            })?;
        let api_hash = env_str("TELEGRAM_API_HASH")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("TELEGRAM_API_HASH environment variable is required".to_string())
            })?;

        let data_dir = env::var_os("KEYWATCH_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".keywatch")))
            .ok_or_else(|| Error::Config("HOME is not set".to_string()))?;
        fs::create_dir_all(&data_dir)?;

        Ok(Self {
            api_id,
            api_hash,
            settings_file: data_dir.join("settings.json"),
            session_file: data_dir.join("session.json"),
        })
    }
}

/// User-tunable monitoring settings.
///
/// The UI owns a mutable copy and publishes immutable snapshots; the pipeline
/// reads one snapshot per message, so edits never race a message in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub keywords: Vec<String>,
    pub excluded_channels: Vec<Channel>,
    pub sound_mappings: Vec<SoundMapping>,
    pub default_sound: String,
    pub message_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            excluded_channels: Vec::new(),
            sound_mappings: Vec::new(),
            default_sound: DEFAULT_SOUND.to_string(),
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }
}

impl Settings {
    /// Adds a keyword. Duplicates (case-insensitive) and blank entries are
    /// silently ignored.
    pub fn add_keyword(&mut self, keyword: impl Into<String>) {
        let keyword = keyword.into();
        if keyword.trim().is_empty() {
            return;
        }
        let folded = keyword.to_lowercase();
        if self.keywords.iter().any(|k| k.to_lowercase() == folded) {
            return;
        }
        self.keywords.push(keyword);
    }

    pub fn remove_keyword(&mut self, index: usize) {
        if index < self.keywords.len() {
            self.keywords.remove(index);
        }
    }

    /// Adds a channel to the exclusion set, keyed by id; a channel already
    /// present (under any name) is ignored.
    pub fn add_excluded_channel(&mut self, channel: Channel) {
        if self.excluded_channels.iter().any(|c| c.id == channel.id) {
            return;
        }
        self.excluded_channels.push(channel);
    }

    pub fn remove_excluded_channel(&mut self, index: usize) {
        if index < self.excluded_channels.len() {
            self.excluded_channels.remove(index);
        }
    }

    pub fn is_excluded(&self, chat_id: &ChatId) -> bool {
        self.excluded_channels.iter().any(|c| &c.id == chat_id)
    }

    pub fn add_sound_mapping(&mut self, mapping: SoundMapping) {
        self.sound_mappings.push(mapping);
    }

    pub fn remove_sound_mapping(&mut self, index: usize) {
        if index < self.sound_mappings.len() {
            self.sound_mappings.remove(index);
        }
    }

    pub fn update_sound_mapping(&mut self, index: usize, mapping: SoundMapping) {
        if let Some(slot) = self.sound_mappings.get_mut(index) {
            *slot = mapping;
        }
    }

    /// Reads settings from `path`; a missing or empty file yields defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path)?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_json::from_str(&txt)?;
        Ok(settings)
    }

    pub fn save_file(&self, path: &Path) -> Result<()> {
        let txt = serde_json::to_string_pretty(self)?;
        fs::write(path, txt)?;
        Ok(())
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // never override the real environment
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keywords_are_silently_ignored() {
        let mut settings = Settings::default();
        settings.add_keyword("Shahed");
        settings.add_keyword("shahed");
        settings.add_keyword("SHAHED");
        settings.add_keyword("rocket");

        assert_eq!(settings.keywords, vec!["Shahed", "rocket"]);
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let mut settings = Settings::default();
        settings.add_keyword("   ");
        settings.add_keyword("");
        assert!(settings.keywords.is_empty());
    }

    #[test]
    fn excluded_channels_dedupe_by_id_not_name() {
        let mut settings = Settings::default();
        settings.add_excluded_channel(Channel {
            name: "Spam".to_string(),
            id: ChatId::new("42"),
        });
        settings.add_excluded_channel(Channel {
            name: "Spam (renamed)".to_string(),
            id: ChatId::new("42"),
        });

        assert_eq!(settings.excluded_channels.len(), 1);
        assert!(settings.is_excluded(&ChatId::new("42")));
        assert!(!settings.is_excluded(&ChatId::new("99")));
    }

    #[test]
    fn defaults_match_shipped_configuration() {
        let settings = Settings::default();
        assert_eq!(settings.default_sound, "beep-10.mp3");
        assert_eq!(settings.message_limit, 10);
        assert!(AVAILABLE_SOUNDS.contains(&settings.default_sound.as_str()));
    }

    #[test]
    fn settings_survive_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.add_keyword("alert");
        settings.add_sound_mapping(SoundMapping {
            keywords: vec!["alert".to_string()],
            sound_file: "siren.mp3".to_string(),
            enabled: true,
        });
        settings.save_file(&path).unwrap();

        let loaded = Settings::load_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn update_sound_mapping_replaces_in_place() {
        let mut settings = Settings::default();
        settings.add_sound_mapping(SoundMapping {
            keywords: vec!["a".to_string()],
            sound_file: "x.mp3".to_string(),
            enabled: true,
        });
        settings.update_sound_mapping(
            0,
            SoundMapping {
                keywords: vec!["a".to_string()],
                sound_file: "y.mp3".to_string(),
                enabled: false,
            },
        );

        assert_eq!(settings.sound_mappings[0].sound_file, "y.mp3");
        assert!(!settings.sound_mappings[0].enabled);
    }
}
