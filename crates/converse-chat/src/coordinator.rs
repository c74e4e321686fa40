//! Session coordinator: the composition root of a conversation.
//!
//! `submit` freezes the pending attachments, appends and persists the user
//! turn, asks the orchestrator for a reply, then appends and persists that.
//! A single in-flight guard serializes submissions so a trigger-phrase send
//! racing a manual send yields one message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use converse_core::config::{ChatConfig, ConverseConfig};
use converse_core::types::{
    Agent, Attachment, Feedback, FeedbackKind, Message, MessageId, Session, SessionId,
};
use converse_dictation::{
    compose_text, DictationEngine, DictationEvent, InputBuffer, StartOutcome,
};

use crate::attachment::AttachmentPipeline;
use crate::error::ChatError;
use crate::feedback::FeedbackSink;
use crate::lifecycle::{DeleteReport, EditOutcome, MessageLifecycle};
use crate::orchestrator::{ReplyKind, ResponseOrchestrator, TurnContext};
use crate::storage::Storage;

/// User-visible message raised by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
}

impl Notice {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Why a submit was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No text and no attachments.
    Empty,
    /// Another submit is running.
    InFlight,
    /// A reply is being generated.
    Loading,
}

/// Result of `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Rejected(RejectReason),
    Sent {
        session_id: SessionId,
        user: Message,
        reply: Message,
        reply_kind: ReplyKind,
    },
    /// The session could not be created; nothing was appended.
    Failed(Notice),
}

/// Attachments a submit sends.
enum Captured {
    Given(Vec<Attachment>),
    /// Frozen from the pipeline once the submit is accepted.
    Pending,
}

/// Clears an `AtomicBool` flag when dropped.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct SessionCoordinator {
    storage: Arc<dyn Storage>,
    feedback: Arc<dyn FeedbackSink>,
    lifecycle: MessageLifecycle,
    attachments: Arc<AttachmentPipeline>,
    dictation: Option<DictationEngine>,
    input: InputBuffer,
    config: ChatConfig,
    language: String,
    active_session: Mutex<SessionId>,
    agent: Mutex<Agent>,
    in_flight: AtomicBool,
    loading: AtomicBool,
    notices: broadcast::Sender<Notice>,
}

impl SessionCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        feedback: Arc<dyn FeedbackSink>,
        orchestrator: Arc<ResponseOrchestrator>,
        config: &ConverseConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            lifecycle: MessageLifecycle::new(storage.clone(), orchestrator),
            storage,
            feedback,
            attachments: Arc::new(AttachmentPipeline::new()),
            dictation: None,
            input: InputBuffer::new(),
            config: config.chat.clone(),
            language: config.general.language.clone(),
            active_session: Mutex::new(SessionId::unsaved()),
            agent: Mutex::new(Agent::new(config.agent.name.clone(), config.agent.kind)),
            in_flight: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            notices,
        }
    }

    /// Attach a dictation engine. The composer input becomes the engine's.
    pub fn with_dictation(mut self, engine: DictationEngine) -> Self {
        self.input = engine.input().clone();
        self.dictation = Some(engine);
        self
    }

    pub fn lifecycle(&self) -> &MessageLifecycle {
        &self.lifecycle
    }

    pub fn attachments(&self) -> &Arc<AttachmentPipeline> {
        &self.attachments
    }

    pub fn dictation(&self) -> Option<&DictationEngine> {
        self.dictation.as_ref()
    }

    /// Composer text.
    pub fn input(&self) -> &InputBuffer {
        &self.input
    }

    pub fn active_session(&self) -> SessionId {
        self.active_session
            .lock()
            .expect("session mutex poisoned")
            .clone()
    }

    pub fn agent(&self) -> Agent {
        self.agent.lock().expect("agent mutex poisoned").clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Submit `text` with the given attachments. The pending list is cleared.
    pub async fn submit(&self, text: &str, attachments: Vec<Attachment>) -> SubmitOutcome {
        self.submit_with(text, Captured::Given(attachments)).await
    }

    /// Submit `text` with whatever is pending in the attachment pipeline.
    ///
    /// The pending list is frozen and cleared in one step once the session is
    /// resolved, so nothing ingested before that point is dropped unsent.
    pub async fn submit_pending(&self, text: &str) -> SubmitOutcome {
        self.submit_with(text, Captured::Pending).await
    }

    /// Manual send: the composer text, including anything dictated, followed
    /// by `typed`, with the pending attachments.
    pub async fn submit_input(&self, typed: &str) -> SubmitOutcome {
        let text = compose_text(&self.input.get(), typed);
        self.submit_pending(&text).await
    }

    async fn submit_with(&self, text: &str, captured: Captured) -> SubmitOutcome {
        let text = text.trim();
        let has_attachments = match &captured {
            Captured::Given(attachments) => !attachments.is_empty(),
            Captured::Pending => !self.attachments.is_empty(),
        };
        if text.is_empty() && !has_attachments {
            return SubmitOutcome::Rejected(RejectReason::Empty);
        }
        let Some(_in_flight) = FlagGuard::acquire(&self.in_flight) else {
            tracing::debug!("Submit ignored: another send is in flight");
            return SubmitOutcome::Rejected(RejectReason::InFlight);
        };
        let Some(_loading) = FlagGuard::acquire(&self.loading) else {
            tracing::debug!("Submit ignored: a reply is being generated");
            return SubmitOutcome::Rejected(RejectReason::Loading);
        };

        let (session_id, first_turn) = match self.ensure_session().await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create session");
                let notice = self.notify("Could not start a new conversation. Please try again.");
                return SubmitOutcome::Failed(notice);
            }
        };

        let attachments = match captured {
            Captured::Given(attachments) => {
                self.attachments.remove(None);
                attachments
            }
            Captured::Pending => self.attachments.take_pending(),
        };

        if let Some(engine) = &self.dictation {
            engine.stop().await;
        }

        let content = if text.is_empty() {
            self.config.attachment_only_prompt.clone()
        } else {
            text.to_string()
        };
        let agent = self.agent();
        let user = Message::user(content, attachments, agent.clone());
        self.input.clear();

        let history = self.lifecycle.messages();
        self.lifecycle.append(user.clone());
        let title = first_turn.then(|| derive_title(&user.content, self.config.title_max_chars));
        if let Err(e) = self
            .storage
            .save_message(&session_id, &user, title.as_deref())
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to save user message");
            self.notify("Your message could not be saved.");
        }

        let context = TurnContext::new(&agent, self.language.clone(), first_turn);
        let reply = self
            .lifecycle
            .orchestrator()
            .respond(&history, &user.content, &user.attachments, &context)
            .await;
        let reply_kind = reply.kind;
        let reply = reply.into_message(Some(user.id.clone()));
        self.lifecycle.append(reply.clone());
        if let Err(e) = self.storage.save_message(&session_id, &reply, None).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to save reply");
            self.notify("The reply could not be saved.");
        }

        tracing::info!(
            session_id = %session_id,
            message_id = %user.id,
            reply_kind = ?reply_kind,
            first_turn,
            "Message sent"
        );
        SubmitOutcome::Sent {
            session_id,
            user,
            reply,
            reply_kind,
        }
    }

    /// Edit a user message and regenerate the conversation after it.
    ///
    /// Rejected while a submit or another edit is running.
    pub async fn edit(
        &self,
        message_id: &MessageId,
        new_content: &str,
    ) -> Result<EditOutcome, ChatError> {
        let session_id = self.saved_session()?;
        if self.in_flight.load(Ordering::SeqCst) {
            self.notify("Please wait for the current reply to finish.");
            return Ok(EditOutcome::Rejected);
        }
        let Some(_loading) = FlagGuard::acquire(&self.loading) else {
            self.notify("Please wait for the current reply to finish.");
            return Ok(EditOutcome::Rejected);
        };
        let context = TurnContext::new(&self.agent(), self.language.clone(), false);
        let result = self
            .lifecycle
            .edit_and_regenerate(&session_id, message_id, new_content, &context)
            .await;
        if let Err(e) = &result {
            tracing::warn!(session_id = %session_id, error = %e, "Edit failed");
            self.notify("The message could not be edited. The conversation was reloaded.");
        }
        result
    }

    /// Delete a message together with its adjacent reply.
    pub async fn delete(&self, message_id: &MessageId) -> Result<DeleteReport, ChatError> {
        let session_id = self.saved_session()?;
        let report = self
            .lifecycle
            .delete_with_cascade(&session_id, message_id)
            .await?;
        if !report.failed.is_empty() {
            self.notify("Some messages could not be deleted from storage.");
        }
        Ok(report)
    }

    /// Rename an attachment of a sent message.
    pub async fn rename_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
        new_name: &str,
    ) -> Result<Message, ChatError> {
        let session_id = self.saved_session()?;
        self.lifecycle
            .rename_attachment(&session_id, message_id, attachment_id, new_name)
            .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ChatError> {
        self.storage.list_sessions().await
    }

    /// Make `session_id` the active session and load its history.
    pub async fn open_session(&self, session_id: &SessionId) -> Result<(), ChatError> {
        if session_id.is_new() {
            self.start_new_session();
            return Ok(());
        }
        self.lifecycle.load(session_id).await?;
        *self.active_session.lock().expect("session mutex poisoned") = session_id.clone();
        tracing::info!(session_id = %session_id, "Session opened");
        Ok(())
    }

    /// Reset to the unsaved sentinel; the session is created on first submit.
    pub fn start_new_session(&self) {
        *self.active_session.lock().expect("session mutex poisoned") = SessionId::unsaved();
        self.lifecycle.clear();
        tracing::debug!("New session started");
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), ChatError> {
        self.storage.delete_session(session_id).await?;
        if &self.active_session() == session_id {
            self.start_new_session();
        }
        tracing::info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Switch agents. Dictation stops when the new agent has no voice.
    pub async fn select_agent(&self, agent: Agent) {
        let capabilities = agent.capabilities();
        tracing::info!(agent = %agent.name, kind = ?agent.kind, "Agent selected");
        *self.agent.lock().expect("agent mutex poisoned") = agent;
        if !capabilities.voice {
            if let Some(engine) = &self.dictation {
                engine.stop().await;
            }
        }
    }

    /// Start dictation if the active agent supports voice.
    pub async fn start_dictation(&self) -> Result<StartOutcome, ChatError> {
        let Some(engine) = &self.dictation else {
            self.notify("Voice dictation is not available.");
            return Ok(StartOutcome::Unsupported);
        };
        if !self.agent().capabilities().voice {
            self.notify("The selected agent does not accept voice input.");
            return Ok(StartOutcome::Unsupported);
        }
        Ok(engine.start().await?)
    }

    pub async fn stop_dictation(&self) {
        if let Some(engine) = &self.dictation {
            engine.stop().await;
        }
    }

    /// Post thumbs up/down on a message of the active session.
    pub async fn post_feedback(
        &self,
        message_id: &MessageId,
        kind: FeedbackKind,
        categories: Vec<String>,
        details: Option<String>,
    ) -> Result<(), ChatError> {
        let session_id = self.saved_session()?;
        if self.lifecycle.find(message_id).is_none() {
            return Err(ChatError::MessageNotFound(message_id.to_string()));
        }
        self.feedback
            .post(Feedback {
                session_id,
                message_id: message_id.clone(),
                kind,
                categories,
                details,
            })
            .await
    }

    /// Forward dictation events: trigger-phrase sends go through `submit` and
    /// engine notices become coordinator notices.
    pub fn spawn_dictation_bridge(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.dictation.as_ref()?.subscribe();
        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DictationEvent::SubmitRequested(text)) => {
                        let outcome = coordinator.submit_pending(&text).await;
                        tracing::debug!(outcome = ?outcome_label(&outcome), "Dictation submit");
                    }
                    Ok(DictationEvent::Notice(text)) => {
                        coordinator.notify(text);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Dictation bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    // -- Private helpers --

    async fn ensure_session(&self) -> Result<(SessionId, bool), ChatError> {
        let current = self.active_session();
        if !current.is_new() {
            return Ok((current, false));
        }
        let created = self.storage.create_session().await?;
        *self.active_session.lock().expect("session mutex poisoned") = created.clone();
        tracing::info!(session_id = %created, "Session created");
        Ok((created, true))
    }

    fn saved_session(&self) -> Result<SessionId, ChatError> {
        let session_id = self.active_session();
        if session_id.is_new() {
            return Err(ChatError::SessionNotFound(session_id.to_string()));
        }
        Ok(session_id)
    }

    fn notify(&self, text: impl Into<String>) -> Notice {
        let notice = Notice::new(text);
        tracing::debug!(notice = %notice.text, "Notice");
        let _ = self.notices.send(notice.clone());
        notice
    }
}

fn outcome_label(outcome: &SubmitOutcome) -> &'static str {
    match outcome {
        SubmitOutcome::Rejected(_) => "rejected",
        SubmitOutcome::Sent { .. } => "sent",
        SubmitOutcome::Failed(_) => "failed",
    }
}

/// First line of `content`, cut to `max_chars` characters.
pub fn derive_title(content: &str, max_chars: usize) -> String {
    let line = content.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.is_empty() {
        return "New conversation".to_string();
    }
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let cut: String = line.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

// =============================================================================
// Tests
// =============================================================================
