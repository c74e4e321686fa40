//! Error types for the conversation side.

use converse_core::error::ConverseError;

/// Failures reported by the AI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AiError {
    #[error("rate limited")]
    RateLimited,
    #[error("request failed with status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AiError {
    /// Classify an HTTP status and the error status string from the body.
    ///
    /// 429 and `RESOURCE_EXHAUSTED` both mean rate limited.
    pub fn from_status(code: u16, status: Option<&str>, message: impl Into<String>) -> Self {
        if code == 429 || status == Some("RESOURCE_EXHAUSTED") {
            AiError::RateLimited
        } else {
            AiError::Status {
                code,
                message: message.into(),
            }
        }
    }
}

/// Errors from the conversation side.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("attachment error: {0}")]
    Attachment(String),
    #[error("invalid attachment locator: {0}")]
    InvalidLocator(String),
    #[error("dictation error: {0}")]
    Dictation(String),
}

impl From<ConverseError> for ChatError {
    fn from(err: ConverseError) -> Self {
        match err {
            ConverseError::Dictation(msg) | ConverseError::Speech(msg) => ChatError::Dictation(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(
            ChatError::MessageNotFound("m1".to_string()).to_string(),
            "message not found: m1"
        );
        assert_eq!(
            ChatError::SessionNotFound("s1".to_string()).to_string(),
            "session not found: s1"
        );
        assert_eq!(
            ChatError::Storage("disk full".to_string()).to_string(),
            "storage error: disk full"
        );
        assert_eq!(
            ChatError::InvalidLocator("photo.png".to_string()).to_string(),
            "invalid attachment locator: photo.png"
        );
    }

    #[test]
    fn test_ai_error_status_mapping() {
        assert_eq!(AiError::from_status(429, None, "slow down"), AiError::RateLimited);
        assert_eq!(
            AiError::from_status(400, Some("RESOURCE_EXHAUSTED"), "quota"),
            AiError::RateLimited
        );
        assert_eq!(
            AiError::from_status(500, Some("INTERNAL"), "boom"),
            AiError::Status {
                code: 500,
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_chat_error_from_converse_error() {
        let err: ChatError = ConverseError::Config("bad key".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(err.to_string().contains("bad key"));

        let err: ChatError = ConverseError::Speech("not-allowed".to_string()).into();
        assert!(matches!(err, ChatError::Dictation(_)));
    }
}
