//! Conversation side of the Converse client.
//!
//! Provides the attachment pipeline, the AI collaborator contract with a
//! Gemini implementation, the response orchestrator, storage and feedback
//! contracts, the message lifecycle and the session coordinator that ties
//! them together.

pub mod attachment;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod feedback;
pub mod gemini;
pub mod lifecycle;
pub mod orchestrator;
pub mod storage;

pub use attachment::{AttachmentPipeline, FileLike, FileSource};
pub use client::{AiClient, AiRequest, InlineDocument, InlineImage, Turn};
pub use coordinator::{derive_title, Notice, RejectReason, SessionCoordinator, SubmitOutcome};
pub use error::{AiError, ChatError};
pub use feedback::{FeedbackSink, MemoryFeedback};
pub use gemini::GeminiClient;
pub use lifecycle::{DeleteReport, EditOutcome, MessageLifecycle};
pub use orchestrator::{AssistantReply, ReplyKind, ResponseOrchestrator, TurnContext};
pub use storage::{MemoryStorage, Storage};
