//! Spoken "send" trigger detection.
//!
//! A transcript fragment triggers a send only when it equals or ends with one
//! of the configured phrases. A phrase in the middle of the fragment does not
//! count. Matching is case-insensitive and tolerates trailing punctuation.

use regex::Regex;

use converse_core::error::ConverseError;

/// Result of a successful trigger detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    /// The phrase as it appeared in the fragment.
    pub phrase: String,
    /// The fragment with the phrase and any trailing punctuation removed.
    pub cleaned: String,
}

/// Tail-anchored matcher over a fixed set of trigger phrases.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    phrases: Vec<String>,
    pattern: Option<Regex>,
}

impl TriggerMatcher {
    /// Build a matcher. Phrases are trimmed and lowercased; longer phrases are
    /// tried first so "send it now" wins over "send it". An empty phrase list
    /// yields a matcher that never fires.
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, ConverseError> {
        let mut normalized: Vec<String> = Vec::new();
        for phrase in phrases {
            let phrase = phrase.as_ref().trim().to_lowercase();
            if !phrase.is_empty() && !normalized.contains(&phrase) {
                normalized.push(phrase);
            }
        }
        normalized.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        let phrases = normalized;

        if phrases.is_empty() {
            return Ok(Self {
                phrases,
                pattern: None,
            });
        }

        let alternatives = phrases
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(
            r"(?i)(?:^|[\s\p{{P}}]+)({})[\s\p{{P}}]*$",
            alternatives
        ))
        .map_err(|e| ConverseError::Config(format!("invalid trigger phrase: {}", e)))?;

        Ok(Self {
            phrases,
            pattern: Some(pattern),
        })
    }

    /// The normalized phrase list.
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Check whether `fragment` ends with a trigger phrase.
    pub fn detect(&self, fragment: &str) -> Option<TriggerMatch> {
        let pattern = self.pattern.as_ref()?;
        let trimmed = fragment.trim();
        let captures = pattern.captures(trimmed)?;
        let whole = captures.get(0)?;
        let phrase = captures.get(1)?.as_str().to_string();
        let cleaned = trimmed[..whole.start()].trim_end().to_string();
        Some(TriggerMatch { phrase, cleaned })
    }
}

// =============================================================================
// Tests
// =============================================================================
