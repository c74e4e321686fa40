//! CLI argument definitions for the Converse terminal client.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use converse_core::config::ConverseConfig;
use converse_core::types::AgentKind;

/// Converse: a terminal assistant client with continuous dictation.
#[derive(Parser, Debug)]
#[command(name = "converse", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Model identifier sent to the AI collaborator.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Agent kind: aisa, document, creative, voice, medical, generic.
    #[arg(short = 'a', long = "agent")]
    pub agent: Option<AgentKind>,

    /// Reply language code, e.g. "en" or "fr".
    #[arg(long = "language")]
    pub language: Option<String>,

    /// Answer with the offline echo client even when an API key is set.
    #[arg(long = "offline")]
    pub offline: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CONVERSE_CONFIG env var > ~/.converse/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CONVERSE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config: &ConverseConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }

    /// Apply flag overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut ConverseConfig) {
        if let Some(ref model) = self.model {
            config.ai.model = model.clone();
        }
        if let Some(kind) = self.agent {
            config.agent.kind = kind;
            if kind != AgentKind::Aisa && config.agent.name == "AISA" {
                config.agent.name = format!("{:?}", kind);
            }
        }
        if let Some(ref language) = self.language {
            config.general.language = language.clone();
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".converse").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".converse").join("config.toml");
    }
    PathBuf::from("config.toml")
}

// =============================================================================
// Tests
// =============================================================================
