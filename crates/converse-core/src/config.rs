use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConverseError, Result};
use crate::types::AgentKind;

/// Top-level configuration for the Converse client.
///
/// Loaded from `~/.converse/config.toml` by default. Each section corresponds
/// to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverseConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub dictation: DictationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl ConverseConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConverseConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConverseError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Language the assistant is asked to reply in.
    pub language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Voice dictation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DictationConfig {
    /// Spoken phrases that end dictation and submit the composed text.
    pub trigger_phrases: Vec<String>,
    /// Delay before re-starting recognition after the backend ends an utterance.
    pub restart_delay_ms: u64,
    /// Interval of the elapsed-time counter.
    pub tick_interval_ms: u64,
}

impl Default for DictationConfig {
    fn default() -> Self {
        Self {
            trigger_phrases: [
                "send it",
                "send message",
                "bhej do",
                "yes send it",
                "message bhej do",
                "isey bhej do",
                "ok send it",
                "ok send",
                "send bhej do",
                "theek hai bhej do",
                "send now",
                "please send",
                "ji bhejo",
                "kar do",
                "ok bhej do",
                "okay send it",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            restart_delay_ms: 50,
            tick_interval_ms: 1000,
        }
    }
}

/// Conversation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum number of prior turns sent to the AI collaborator.
    pub history_limit: usize,
    /// Message content used when only attachments are submitted.
    pub attachment_only_prompt: String,
    /// Reply used when the AI collaborator answers with an empty string.
    pub empty_reply_fallback: String,
    /// Reply used when the AI collaborator is rate limited.
    pub rate_limited_reply: String,
    /// Reply used when the AI collaborator cannot be reached.
    pub unreachable_reply: String,
    /// Maximum characters of a derived session title.
    pub title_max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            attachment_only_prompt: "Analyze these files".to_string(),
            empty_reply_fallback: "I could not generate a response. Please try again.".to_string(),
            rate_limited_reply:
                "The system is busy right now. Please retry in a few moments.".to_string(),
            unreachable_reply:
                "I cannot reach the network right now. Please check your connection and try again."
                    .to_string(),
            title_max_chars: 50,
        }
    }
}

/// AI collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Model identifier sent with every request.
    pub model: String,
    /// Base URL of the generation endpoint.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Active agent selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name of the agent.
    pub name: String,
    /// Agent variant; decides the capability set.
    pub kind: AgentKind,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "AISA".to_string(),
            kind: AgentKind::Aisa,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ConverseConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.language, "en");
        assert_eq!(config.dictation.restart_delay_ms, 50);
        assert_eq!(config.dictation.tick_interval_ms, 1000);
        let phrases = &config.dictation.trigger_phrases;
        assert_eq!(phrases.len(), 16);
        for phrase in ["send it", "bhej do", "ok send", "please send", "okay send it"] {
            assert!(phrases.contains(&phrase.to_string()), "missing {phrase}");
        }
        assert!(!phrases.iter().any(|p| p == "envoie" || p == "enviar"));
        assert_eq!(config.chat.history_limit, 50);
        assert_eq!(config.chat.attachment_only_prompt, "Analyze these files");
        assert_eq!(config.ai.model, "gemini-2.5-flash");
        assert_eq!(config.agent.kind, AgentKind::Aisa);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"
language = "fr"

[dictation]
trigger_phrases = ["over and out"]
restart_delay_ms = 120

[chat]
history_limit = 10

[agent]
name = "Doc"
kind = "document"
"#;
        let file = create_temp_config(content);
        let config = ConverseConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.language, "fr");
        assert_eq!(config.dictation.trigger_phrases, vec!["over and out"]);
        assert_eq!(config.dictation.restart_delay_ms, 120);
        // Unset fields in a present section keep their defaults.
        assert_eq!(config.dictation.tick_interval_ms, 1000);
        assert_eq!(config.chat.history_limit, 10);
        assert_eq!(config.chat.title_max_chars, 50);
        assert_eq!(config.agent.name, "Doc");
        assert_eq!(config.agent.kind, AgentKind::Document);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ConverseConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.chat.history_limit, 50);
        assert_eq!(config.ai.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = ConverseConfig::load(file.path());
        assert!(matches!(result, Err(ConverseError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ConverseConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.dictation.restart_delay_ms, 50);
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = ConverseConfig::default();
        config.general.language = "ar".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = ConverseConfig::load(&path).unwrap();
        assert_eq!(reloaded.general.language, "ar");
        assert_eq!(
            reloaded.dictation.trigger_phrases,
            config.dictation.trigger_phrases
        );
    }
}
