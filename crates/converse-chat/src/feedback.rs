//! Feedback collaborator.

use std::sync::Mutex;

use async_trait::async_trait;

use converse_core::types::Feedback;

use crate::error::ChatError;

/// Receives thumbs up/down feedback on assistant replies.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn post(&self, feedback: Feedback) -> Result<(), ChatError>;
}

/// Records posted feedback in memory.
#[derive(Debug, Default)]
pub struct MemoryFeedback {
    posts: Mutex<Vec<Feedback>>,
}

impl MemoryFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<Feedback> {
        self.posts.lock().expect("feedback mutex poisoned").clone()
    }
}

#[async_trait]
impl FeedbackSink for MemoryFeedback {
    async fn post(&self, feedback: Feedback) -> Result<(), ChatError> {
        tracing::info!(
            session_id = %feedback.session_id,
            message_id = %feedback.message_id,
            kind = ?feedback.kind,
            "Feedback posted"
        );
        self.posts
            .lock()
            .expect("feedback mutex poisoned")
            .push(feedback);
        Ok(())
    }
}
