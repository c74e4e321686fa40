//! AI collaborator contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use converse_core::types::Role;

use crate::error::AiError;

/// One prior turn sent as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Inline image payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// Inline document payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineDocument {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
    pub name: String,
}

/// A fully built generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiRequest {
    /// Current user content, including bracketed link notes.
    pub content: String,
    /// Prior turns, oldest first.
    pub history: Vec<Turn>,
    pub system_instruction: String,
    pub images: Vec<InlineImage>,
    pub documents: Vec<InlineDocument>,
    pub model: String,
}

/// Text generation collaborator.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Generate a reply. An empty string is a valid (if unhelpful) reply.
    async fn generate(&self, request: &AiRequest) -> Result<String, AiError>;
}
