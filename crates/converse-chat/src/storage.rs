//! Storage collaborator contract and an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use converse_core::types::{Message, MessageId, Session, SessionId};

use crate::error::ChatError;

/// Persistence of sessions and their ordered messages.
///
/// Every call may fail. Callers treat failures as recoverable.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<Session>, ChatError>;

    async fn create_session(&self) -> Result<SessionId, ChatError>;

    /// Messages of a session in append order.
    async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Message>, ChatError>;

    /// Append a message. `title` renames the session when given.
    async fn save_message(
        &self,
        session_id: &SessionId,
        message: &Message,
        title: Option<&str>,
    ) -> Result<(), ChatError>;

    async fn update_message(&self, session_id: &SessionId, message: &Message)
        -> Result<(), ChatError>;

    async fn delete_message(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<(), ChatError>;

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), ChatError>;
}

struct StoredSession {
    session: Session,
    messages: Vec<Message>,
}

/// Process-local storage backed by a `HashMap`.
///
/// Failures can be injected for tests and offline runs: `set_unavailable`
/// fails every call, `fail_delete_of` fails deletion of one message.
#[derive(Default)]
pub struct MemoryStorage {
    sessions: Mutex<HashMap<SessionId, StoredSession>>,
    unavailable: AtomicBool,
    failing_deletes: Mutex<HashSet<MessageId>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_delete_of(&self, message_id: &MessageId) {
        self.failing_deletes
            .lock()
            .expect("storage mutex poisoned")
            .insert(message_id.clone());
    }

    /// Stored messages of a session, or an empty list.
    pub fn messages(&self, session_id: &SessionId) -> Vec<Message> {
        self.sessions
            .lock()
            .expect("storage mutex poisoned")
            .get(session_id)
            .map(|stored| stored.messages.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), ChatError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ChatError::Storage("storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_sessions(&self) -> Result<Vec<Session>, ChatError> {
        self.check_available()?;
        let sessions = self.sessions.lock().expect("storage mutex poisoned");
        let mut list: Vec<Session> = sessions.values().map(|s| s.session.clone()).collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn create_session(&self) -> Result<SessionId, ChatError> {
        self.check_available()?;
        let now = Utc::now();
        let id = SessionId::new(Uuid::new_v4().to_string());
        let session = Session {
            id: id.clone(),
            title: "New conversation".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.sessions.lock().expect("storage mutex poisoned").insert(
            id.clone(),
            StoredSession {
                session,
                messages: Vec::new(),
            },
        );
        tracing::debug!(session_id = %id, "Session created");
        Ok(id)
    }

    async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Message>, ChatError> {
        self.check_available()?;
        let sessions = self.sessions.lock().expect("storage mutex poisoned");
        sessions
            .get(session_id)
            .map(|stored| stored.messages.clone())
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))
    }

    async fn save_message(
        &self,
        session_id: &SessionId,
        message: &Message,
        title: Option<&str>,
    ) -> Result<(), ChatError> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().expect("storage mutex poisoned");
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        stored.messages.push(message.clone());
        if let Some(title) = title {
            stored.session.title = title.to_string();
        }
        stored.session.updated_at = Utc::now();
        Ok(())
    }

    async fn update_message(
        &self,
        session_id: &SessionId,
        message: &Message,
    ) -> Result<(), ChatError> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().expect("storage mutex poisoned");
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        let slot = stored
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| ChatError::MessageNotFound(message.id.to_string()))?;
        *slot = message.clone();
        stored.session.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_message(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<(), ChatError> {
        self.check_available()?;
        if self
            .failing_deletes
            .lock()
            .expect("storage mutex poisoned")
            .contains(message_id)
        {
            return Err(ChatError::Storage(format!(
                "failed to delete message {}",
                message_id
            )));
        }
        let mut sessions = self.sessions.lock().expect("storage mutex poisoned");
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        let before = stored.messages.len();
        stored.messages.retain(|m| &m.id != message_id);
        if stored.messages.len() == before {
            return Err(ChatError::MessageNotFound(message_id.to_string()));
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), ChatError> {
        self.check_available()?;
        self.sessions
            .lock()
            .expect("storage mutex poisoned")
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
