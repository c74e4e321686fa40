//! Canonical message list of the active session.
//!
//! All mutations go through [`MessageLifecycle`] and are published as new
//! immutable snapshots. Reply pairing for edit and delete cascades is decided
//! by adjacency in the in-memory list: an `assistant` message directly after a
//! message belongs to it.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use converse_core::types::{Message, MessageId, Role, SessionId};

use crate::error::ChatError;
use crate::orchestrator::{ResponseOrchestrator, TurnContext};
use crate::storage::Storage;

/// Result of `edit_and_regenerate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Empty content or a non-user message. Nothing changed.
    Rejected,
    Regenerated { edited: Message, reply: Message },
}

/// What `delete_with_cascade` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Removed from the local list, in list order.
    pub removed: Vec<MessageId>,
    /// Removed locally but not from storage.
    pub failed: Vec<MessageId>,
}

pub struct MessageLifecycle {
    storage: Arc<dyn Storage>,
    orchestrator: Arc<ResponseOrchestrator>,
    messages: Mutex<Vec<Message>>,
    snapshot: watch::Sender<Arc<Vec<Message>>>,
}

impl MessageLifecycle {
    pub fn new(storage: Arc<dyn Storage>, orchestrator: Arc<ResponseOrchestrator>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            storage,
            orchestrator,
            messages: Mutex::new(Vec::new()),
            snapshot,
        }
    }

    pub fn orchestrator(&self) -> &Arc<ResponseOrchestrator> {
        &self.orchestrator
    }

    /// Current list.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().expect("messages mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().expect("messages mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, message_id: &MessageId) -> Option<Message> {
        self.messages
            .lock()
            .expect("messages mutex poisoned")
            .iter()
            .find(|m| &m.id == message_id)
            .cloned()
    }

    /// Receive a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Message>>> {
        self.snapshot.subscribe()
    }

    /// Add to the tail.
    pub fn append(&self, message: Message) {
        let mut messages = self.messages.lock().expect("messages mutex poisoned");
        messages.push(message);
        self.publish(&messages);
    }

    /// Replace the whole list.
    pub fn replace(&self, list: Vec<Message>) {
        let mut messages = self.messages.lock().expect("messages mutex poisoned");
        *messages = list;
        self.publish(&messages);
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Load the list of `session_id` from storage.
    pub async fn load(&self, session_id: &SessionId) -> Result<(), ChatError> {
        let history = self.storage.get_history(session_id).await?;
        tracing::debug!(session_id = %session_id, messages = history.len(), "History loaded");
        self.replace(history);
        Ok(())
    }

    /// Replace the content of a user message and regenerate everything after it.
    ///
    /// The list is truncated to the messages before the edited one, the edited
    /// message becomes the new tail, then storage is brought in line: the edit
    /// is persisted and every message that followed it is deleted. The reply is
    /// generated from the truncated history. Any failure along the way reloads
    /// the list from storage.
    pub async fn edit_and_regenerate(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        new_content: &str,
        context: &TurnContext,
    ) -> Result<EditOutcome, ChatError> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Ok(EditOutcome::Rejected);
        }

        let (history, edited, stale) = {
            let mut messages = self.messages.lock().expect("messages mutex poisoned");
            let index = messages
                .iter()
                .position(|m| &m.id == message_id)
                .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
            if messages[index].role != Role::User {
                return Ok(EditOutcome::Rejected);
            }

            let stale: Vec<MessageId> = messages[index + 1..].iter().map(|m| m.id.clone()).collect();
            let mut edited = messages[index].clone();
            edited.content = new_content.to_string();
            edited.edited = true;

            messages.truncate(index);
            let history = messages.clone();
            messages.push(edited.clone());
            self.publish(&messages);
            (history, edited, stale)
        };

        tracing::info!(
            session_id = %session_id,
            message_id = %message_id,
            stale = stale.len(),
            "Editing message"
        );

        let mut context = context.clone();
        context.first_turn = history.is_empty();

        match self
            .regenerate(session_id, &history, &edited, &stale, &context)
            .await
        {
            Ok(reply) => Ok(EditOutcome::Regenerated { edited, reply }),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Edit failed; resyncing from storage");
                if let Err(reload) = self.load(session_id).await {
                    tracing::error!(session_id = %session_id, error = %reload, "Resync failed");
                }
                Err(e)
            }
        }
    }

    async fn regenerate(
        &self,
        session_id: &SessionId,
        history: &[Message],
        edited: &Message,
        stale: &[MessageId],
        context: &TurnContext,
    ) -> Result<Message, ChatError> {
        self.storage.update_message(session_id, edited).await?;
        for id in stale {
            match self.storage.delete_message(session_id, id).await {
                Ok(()) | Err(ChatError::MessageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let reply = self
            .orchestrator
            .respond(history, &edited.content, &edited.attachments, context)
            .await
            .into_message(Some(edited.id.clone()));
        self.append(reply.clone());
        self.storage.save_message(session_id, &reply, None).await?;
        Ok(reply)
    }

    /// Delete a message and, when the next message is an assistant reply,
    /// that reply too.
    ///
    /// The local list is updated first. Storage deletes are then replayed one
    /// by one; failures are reported but not rolled back.
    pub async fn delete_with_cascade(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<DeleteReport, ChatError> {
        let removed = {
            let mut messages = self.messages.lock().expect("messages mutex poisoned");
            let index = messages
                .iter()
                .position(|m| &m.id == message_id)
                .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;

            let mut removed = vec![messages[index].id.clone()];
            if let Some(next) = messages.get(index + 1) {
                if next.role == Role::Assistant {
                    if next.reply_to.as_ref().is_some_and(|r| r != message_id) {
                        tracing::warn!(
                            message_id = %message_id,
                            reply_id = %next.id,
                            "Adjacent reply points at a different message"
                        );
                    }
                    removed.push(next.id.clone());
                }
            }
            messages.retain(|m| !removed.contains(&m.id));
            self.publish(&messages);
            removed
        };

        let mut failed = Vec::new();
        for id in &removed {
            if let Err(e) = self.storage.delete_message(session_id, id).await {
                tracing::warn!(session_id = %session_id, message_id = %id, error = %e, "Failed to delete message");
                failed.push(id.clone());
            }
        }
        Ok(DeleteReport { removed, failed })
    }

    /// Rename an attachment on a sent message and persist the message.
    ///
    /// `new_base` replaces the name up to its last `.`; the extension is kept.
    /// Renaming to the current base name changes nothing.
    pub async fn rename_attachment(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        attachment_id: &str,
        new_base: &str,
    ) -> Result<Message, ChatError> {
        let new_base = new_base.trim();
        if new_base.is_empty() {
            return Err(ChatError::Attachment("name cannot be empty".to_string()));
        }

        let updated = {
            let mut messages = self.messages.lock().expect("messages mutex poisoned");
            let message = messages
                .iter_mut()
                .find(|m| &m.id == message_id)
                .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
            let index = message
                .attachments
                .iter()
                .position(|a| a.id == attachment_id)
                .ok_or_else(|| {
                    ChatError::Attachment(format!("attachment not found: {}", attachment_id))
                })?;
            let (base, extension) = split_extension(&message.attachments[index].name);
            if base == new_base {
                return Ok(message.clone());
            }
            let renamed = format!("{}{}", new_base, extension);
            message.attachments[index].name = renamed;
            let updated = message.clone();
            self.publish(&messages);
            updated
        };

        self.storage.update_message(session_id, &updated).await?;
        Ok(updated)
    }

    fn publish(&self, messages: &[Message]) {
        self.snapshot.send_replace(Arc::new(messages.to_vec()));
    }
}

/// Split `name` at its last `.` into base name and extension (dot included).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) => name.split_at(index),
        None => (name, ""),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AiClient, AiRequest};
    use crate::error::AiError;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use converse_core::config::ChatConfig;
    use converse_core::types::{Agent, Attachment, AttachmentCategory, Locator};

    struct Echo;

    #[async_trait]
    impl AiClient for Echo {
        async fn generate(&self, request: &AiRequest) -> Result<String, AiError> {
            Ok(format!("re: {}", request.content))
        }
    }

    struct Fixture {
        storage: Arc<MemoryStorage>,
        lifecycle: MessageLifecycle,
        session: SessionId,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let orchestrator = Arc::new(ResponseOrchestrator::new(
            Arc::new(Echo),
            ChatConfig::default(),
            "test-model",
        ));
        let lifecycle = MessageLifecycle::new(storage.clone(), orchestrator);
        let session = storage.create_session().await.unwrap();
        Fixture {
            storage,
            lifecycle,
            session,
        }
    }

    async fn push(f: &Fixture, message: Message) -> Message {
        f.storage
            .save_message(&f.session, &message, None)
            .await
            .unwrap();
        f.lifecycle.append(message.clone());
        message
    }

    fn context() -> TurnContext {
        TurnContext::new(&Agent::default(), "en", false)
    }

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_append_publishes_snapshot() {
        let f = fixture().await;
        let mut rx = f.lifecycle.subscribe();
        let m = Message::user("hi", vec![], Agent::default());
        f.lifecycle.append(m.clone());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_slice(), &[m]);
    }

    #[tokio::test]
    async fn test_edit_truncates_and_regenerates() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let a1 = push(&f, Message::assistant("one", Some(u1.id.clone()))).await;
        let u2 = push(&f, Message::user("second", vec![], Agent::default())).await;
        let a2 = push(&f, Message::assistant("two", Some(u2.id.clone()))).await;

        let outcome = f
            .lifecycle
            .edit_and_regenerate(&f.session, &u1.id, "first, revised", &context())
            .await
            .unwrap();
        let EditOutcome::Regenerated { edited, reply } = outcome else {
            panic!("expected regeneration");
        };
        assert_eq!(edited.id, u1.id);
        assert!(edited.edited);
        assert_eq!(reply.content, "re: first, revised");
        assert_eq!(reply.reply_to, Some(u1.id.clone()));

        let local = f.lifecycle.messages();
        assert_eq!(ids(&local), vec![u1.id.clone(), reply.id.clone()]);

        let stored = f.storage.messages(&f.session);
        assert_eq!(stored, local);
        for gone in [&a1.id, &u2.id, &a2.id] {
            assert!(stored.iter().all(|m| &m.id != gone));
        }
    }

    #[tokio::test]
    async fn test_edit_middle_keeps_prefix() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let a1 = push(&f, Message::assistant("one", Some(u1.id.clone()))).await;
        let u2 = push(&f, Message::user("second", vec![], Agent::default())).await;
        push(&f, Message::assistant("two", Some(u2.id.clone()))).await;

        f.lifecycle
            .edit_and_regenerate(&f.session, &u2.id, "second again", &context())
            .await
            .unwrap();
        let local = f.lifecycle.messages();
        assert_eq!(local.len(), 4);
        assert_eq!(ids(&local[..3]), vec![u1.id, a1.id, u2.id]);
        assert_eq!(local[3].content, "re: second again");
    }

    #[tokio::test]
    async fn test_edit_with_empty_content_is_rejected() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let before = f.lifecycle.messages();
        let outcome = f
            .lifecycle
            .edit_and_regenerate(&f.session, &u1.id, "   ", &context())
            .await
            .unwrap();
        assert_eq!(outcome, EditOutcome::Rejected);
        assert_eq!(f.lifecycle.messages(), before);
    }

    #[tokio::test]
    async fn test_edit_unknown_message() {
        let f = fixture().await;
        let result = f
            .lifecycle
            .edit_and_regenerate(&f.session, &MessageId::from("nope"), "x", &context())
            .await;
        assert!(matches!(result, Err(ChatError::MessageNotFound(_))));
    }

    #[tokio::test]
    async fn test_edit_failure_resyncs_from_storage() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let a1 = push(&f, Message::assistant("one", Some(u1.id.clone()))).await;
        f.storage.fail_delete_of(&a1.id);

        let result = f
            .lifecycle
            .edit_and_regenerate(&f.session, &u1.id, "revised", &context())
            .await;
        assert!(result.is_err());

        // Storage holds the edit and the undeleted reply; local follows it.
        let local = f.lifecycle.messages();
        assert_eq!(local, f.storage.messages(&f.session));
        assert_eq!(ids(&local), vec![u1.id, a1.id]);
        assert_eq!(local[0].content, "revised");
    }

    #[tokio::test]
    async fn test_delete_user_with_reply() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let a1 = push(&f, Message::assistant("one", Some(u1.id.clone()))).await;
        let u2 = push(&f, Message::user("second", vec![], Agent::default())).await;

        let report = f
            .lifecycle
            .delete_with_cascade(&f.session, &u1.id)
            .await
            .unwrap();
        assert_eq!(report.removed, vec![u1.id, a1.id]);
        assert!(report.failed.is_empty());
        assert_eq!(ids(&f.lifecycle.messages()), vec![u2.id.clone()]);
        assert_eq!(ids(&f.storage.messages(&f.session)), vec![u2.id]);
    }

    #[tokio::test]
    async fn test_delete_user_followed_by_user_removes_only_target() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let u2 = push(&f, Message::user("second", vec![], Agent::default())).await;

        let report = f
            .lifecycle
            .delete_with_cascade(&f.session, &u1.id)
            .await
            .unwrap();
        assert_eq!(report.removed, vec![u1.id]);
        assert_eq!(ids(&f.lifecycle.messages()), vec![u2.id]);
    }

    #[tokio::test]
    async fn test_delete_last_message_removes_only_target() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let report = f
            .lifecycle
            .delete_with_cascade(&f.session, &u1.id)
            .await
            .unwrap();
        assert_eq!(report.removed, vec![u1.id]);
        assert!(f.lifecycle.is_empty());
    }

    #[tokio::test]
    async fn test_delete_partial_failure_is_not_rolled_back() {
        let f = fixture().await;
        let u1 = push(&f, Message::user("first", vec![], Agent::default())).await;
        let a1 = push(&f, Message::assistant("one", Some(u1.id.clone()))).await;
        f.storage.fail_delete_of(&a1.id);

        let report = f
            .lifecycle
            .delete_with_cascade(&f.session, &u1.id)
            .await
            .unwrap();
        assert_eq!(report.failed, vec![a1.id.clone()]);
        assert!(f.lifecycle.is_empty());
        assert_eq!(ids(&f.storage.messages(&f.session)), vec![a1.id]);
    }

    #[tokio::test]
    async fn test_rename_attachment_updates_message_copy() {
        let f = fixture().await;
        let attachment = Attachment {
            id: "att-1".to_string(),
            name: "scan.png".to_string(),
            mime_type: "image/png".to_string(),
            category: AttachmentCategory::Image,
            size: 3,
            is_link: false,
            locator: Locator::inline("image/png", "AAA="),
        };
        let u1 = push(&f, Message::user("look", vec![attachment], Agent::default())).await;

        let updated = f
            .lifecycle
            .rename_attachment(&f.session, &u1.id, "att-1", " receipt ")
            .await
            .unwrap();
        assert_eq!(updated.attachments[0].name, "receipt.png");
        assert_eq!(f.storage.messages(&f.session)[0].attachments[0].name, "receipt.png");

        let unchanged = f
            .lifecycle
            .rename_attachment(&f.session, &u1.id, "att-1", "receipt")
            .await
            .unwrap();
        assert_eq!(unchanged.attachments[0].name, "receipt.png");

        assert!(f
            .lifecycle
            .rename_attachment(&f.session, &u1.id, "missing", "x")
            .await
            .is_err());
        assert!(f
            .lifecycle
            .rename_attachment(&f.session, &u1.id, "att-1", "  ")
            .await
            .is_err());
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("report.final.pdf"), ("report.final", ".pdf"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".env"), ("", ".env"));
    }
}
