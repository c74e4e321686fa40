use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque session identifier. The value `"new"` means the session has not
/// been created in storage yet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Sentinel value for a session that does not exist in storage yet.
    pub const NEW: &'static str = "new";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The "not yet created" sentinel.
    pub fn unsaved() -> Self {
        Self(Self::NEW.to_string())
    }

    pub fn is_new(&self) -> bool {
        self.0 == Self::NEW
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Message identifier derived from the creation timestamp.
///
/// Identifiers sort by creation order and are never reused within a process:
/// the millisecond timestamp is followed by a process-wide sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0);
        let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        Self(format!("{:013}-{:06}", millis, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Sessions and messages
// =============================================================================

/// A persisted conversation. Owned by the storage collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Agent the user was talking to. Set on user messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    /// User message this assistant message answers. Lookup only; reply
    /// pairing is decided by list adjacency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

impl Message {
    /// Create a user message carrying the given attachments.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>, agent: Agent) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            content: content.into(),
            attachments,
            agent: Some(agent),
            created_at: Utc::now(),
            edited: false,
            reply_to: None,
        }
    }

    /// Create an assistant reply to `reply_to`.
    pub fn assistant(content: impl Into<String>, reply_to: Option<MessageId>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::Assistant,
            content: content.into(),
            attachments: Vec::new(),
            agent: None,
            created_at: Utc::now(),
            edited: false,
            reply_to,
        }
    }
}

// =============================================================================
// Attachments
// =============================================================================

/// Display and routing category of an attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentCategory {
    Image,
    Pdf,
    Docx,
    Xlsx,
    Pptx,
    File,
    /// Remote resource referenced by URL.
    Link,
}

impl AttachmentCategory {
    /// Classify a MIME type by substring containment, checked in a fixed
    /// priority order: word, excel, powerpoint, pdf, image.
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type.to_ascii_lowercase();
        if mime.contains("word") {
            AttachmentCategory::Docx
        } else if mime.contains("excel") {
            AttachmentCategory::Xlsx
        } else if mime.contains("powerpoint") {
            AttachmentCategory::Pptx
        } else if mime.contains("pdf") {
            AttachmentCategory::Pdf
        } else if mime.contains("image/") {
            AttachmentCategory::Image
        } else {
            AttachmentCategory::File
        }
    }
}

impl fmt::Display for AttachmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AttachmentCategory::Image => "image",
            AttachmentCategory::Pdf => "pdf",
            AttachmentCategory::Docx => "docx",
            AttachmentCategory::Xlsx => "xlsx",
            AttachmentCategory::Pptx => "pptx",
            AttachmentCategory::File => "file",
            AttachmentCategory::Link => "link",
        };
        f.write_str(label)
    }
}

/// Where the attachment content lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// Self-describing `data:<mime>;base64,<payload>` URL.
    Inline { data_url: String },
    /// Remote link.
    Remote { url: String },
}

impl Locator {
    /// Build an inline locator from an already-encoded payload.
    pub fn inline(mime_type: &str, base64_payload: &str) -> Self {
        Locator::Inline {
            data_url: format!("data:{};base64,{}", mime_type, base64_payload),
        }
    }

    /// Split an inline locator into `(mime, base64 payload)`.
    ///
    /// Returns `None` for remote links and for malformed data URLs.
    pub fn inline_parts(&self) -> Option<(&str, &str)> {
        let Locator::Inline { data_url } = self else {
            return None;
        };
        let rest = data_url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        Some((mime, payload))
    }
}

/// A file or link attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub category: AttachmentCategory,
    /// Size in bytes; 0 for links.
    pub size: u64,
    pub is_link: bool,
    pub locator: Locator,
}

// =============================================================================
// Agents
// =============================================================================

/// Feature flags enabled for an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub voice: bool,
    pub video: bool,
    pub image_upload: bool,
    pub document_upload: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        voice: true,
        video: true,
        image_upload: true,
        document_upload: true,
    };
}

/// Agent variants. Each variant carries a fixed capability set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// General assistant with every capability.
    #[default]
    Aisa,
    Document,
    Creative,
    Voice,
    Medical,
    Generic,
}

impl AgentKind {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            AgentKind::Aisa => Capabilities::ALL,
            AgentKind::Document => Capabilities {
                voice: false,
                video: false,
                image_upload: false,
                document_upload: true,
            },
            AgentKind::Creative => Capabilities {
                voice: true,
                video: false,
                image_upload: true,
                document_upload: false,
            },
            AgentKind::Voice => Capabilities {
                voice: true,
                video: false,
                image_upload: false,
                document_upload: false,
            },
            AgentKind::Medical => Capabilities {
                voice: true,
                video: false,
                image_upload: true,
                document_upload: true,
            },
            AgentKind::Generic => Capabilities {
                voice: false,
                video: false,
                image_upload: false,
                document_upload: false,
            },
        }
    }

    /// Role line contributed to the system instruction.
    pub fn persona_instruction(&self) -> &'static str {
        match self {
            AgentKind::Aisa => "You are AISA, a helpful general-purpose assistant.",
            AgentKind::Document => {
                "You are a document specialist. Summarize, compare and extract information from documents precisely."
            }
            AgentKind::Creative => {
                "You are a creative assistant. Help with writing, ideas and visual concepts."
            }
            AgentKind::Voice => {
                "You are a voice assistant. Keep answers short and easy to read aloud."
            }
            AgentKind::Medical => {
                "You are a medical information assistant. Give general information only and always recommend consulting a qualified professional."
            }
            AgentKind::Generic => "You are a helpful assistant.",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aisa" => Ok(AgentKind::Aisa),
            "document" => Ok(AgentKind::Document),
            "creative" => Ok(AgentKind::Creative),
            "voice" => Ok(AgentKind::Voice),
            "medical" => Ok(AgentKind::Medical),
            "generic" => Ok(AgentKind::Generic),
            other => Err(format!("unknown agent kind: {}", other)),
        }
    }
}

/// The agent a conversation is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub kind: AgentKind,
}

impl Agent {
    pub fn new(name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new("AISA", AgentKind::Aisa)
    }
}

// =============================================================================
// Feedback
// =============================================================================

/// Thumbs up or down on an assistant reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Up,
    Down,
}

/// Feedback posted about a single message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub kind: FeedbackKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
