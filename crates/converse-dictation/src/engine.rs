//! Dictation engine managing continuous recognition for the composer.
//!
//! The `DictationEngine` keeps one dictation session at a time. When the
//! backend ends an utterance on its own, the engine schedules a re-start after
//! a short delay so dictation feels continuous; the only place that decides
//! whether to re-start is the end-of-utterance callback, which consults the
//! session's `manual_stop` flag. Every transcript update is checked for a
//! trigger phrase; a match stops dictation and asks the host to submit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use converse_core::config::DictationConfig;
use converse_core::error::ConverseError;

use crate::backend::{SpeechBackend, SpeechErrorCode};
use crate::state::{DictationPhase, StateMachine};
use crate::trigger::TriggerMatcher;

/// Notice shown when the host has no speech recognition.
pub const UNSUPPORTED_NOTICE: &str = "Voice dictation is not supported in this environment.";

/// Notice shown when microphone access is denied.
pub const PERMISSION_NOTICE: &str =
    "Microphone access was denied. Allow microphone access to use voice dictation.";

/// Join the session base text and a transcript fragment with a single space.
pub fn compose_text(base: &str, fragment: &str) -> String {
    let base = base.trim_end();
    let fragment = fragment.trim();
    match (base.is_empty(), fragment.is_empty()) {
        (true, _) => fragment.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{} {}", base, fragment),
    }
}

/// The composer's text, shared between the engine and the host UI.
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    text: Arc<Mutex<String>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> String {
        self.text.lock().expect("input mutex poisoned").clone()
    }

    pub fn set(&self, text: impl Into<String>) {
        *self.text.lock().expect("input mutex poisoned") = text.into();
    }

    pub fn clear(&self) {
        self.text.lock().expect("input mutex poisoned").clear();
    }
}

/// Events published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictationEvent {
    PhaseChanged(DictationPhase),
    /// The composer text was replaced with live dictation output.
    InputChanged(String),
    /// A trigger phrase was recognized; the payload is the text to submit.
    SubmitRequested(String),
    /// User-facing message (unsupported host, permission denied, ...).
    Notice(String),
}

/// What a transcript update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    /// No active session, or an empty fragment.
    Ignored,
    /// The composer now shows this text.
    Updated(String),
    /// Dictation stopped and this text should be submitted.
    Submit(String),
}

/// Result of `DictationEngine::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyListening,
    Unsupported,
}

/// Data of the active dictation session.
#[derive(Debug, Clone)]
pub struct DictationSession {
    /// Unique identifier for this session.
    pub id: Uuid,
    /// When the user started the session.
    pub start_time: DateTime<Utc>,
    /// Composer text captured when recognition (re-)started. Live transcript
    /// is appended to it.
    pub session_base_text: String,
    /// Set before a user-initiated stop so the end-of-utterance callback does
    /// not re-start recognition.
    pub manual_stop: bool,
    /// Number of automatic re-starts so far.
    pub restarts: u32,
}

impl DictationSession {
    fn new(session_base_text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            session_base_text,
            manual_stop: false,
            restarts: 0,
        }
    }
}

struct Inner {
    backend: Arc<dyn SpeechBackend>,
    matcher: TriggerMatcher,
    input: InputBuffer,
    state_machine: StateMachine,
    session: Mutex<Option<DictationSession>>,
    elapsed_secs: AtomicU64,
    restart_delay: Duration,
    tick_interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    pending_restart: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<DictationEvent>,
}

/// Continuous dictation engine.
///
/// Cloning is cheap and yields a handle to the same engine, so backend
/// callbacks, the restart task and the host UI all see one session.
#[derive(Clone)]
pub struct DictationEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DictationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictationEngine")
            .field("phase", &self.inner.state_machine.current())
            .field("session", &self.inner.session)
            .field("elapsed_secs", &self.elapsed_secs())
            .finish()
    }
}

impl DictationEngine {
    /// Create an engine in the Idle phase.
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        input: InputBuffer,
        config: &DictationConfig,
    ) -> Result<Self, ConverseError> {
        let matcher = TriggerMatcher::new(config.trigger_phrases.as_slice())?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                matcher,
                input,
                state_machine: StateMachine::new(),
                session: Mutex::new(None),
                elapsed_secs: AtomicU64::new(0),
                restart_delay: Duration::from_millis(config.restart_delay_ms),
                tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
                ticker: Mutex::new(None),
                pending_restart: Mutex::new(None),
                events,
            }),
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<DictationEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the current phase.
    pub fn phase(&self) -> DictationPhase {
        self.inner.state_machine.current()
    }

    pub fn is_listening(&self) -> bool {
        self.phase().is_active()
    }

    /// Seconds counted since the user started the current session.
    pub fn elapsed_secs(&self) -> u64 {
        self.inner.elapsed_secs.load(Ordering::SeqCst)
    }

    /// The composer text this engine writes to.
    pub fn input(&self) -> &InputBuffer {
        &self.inner.input
    }

    /// Returns a clone of the current session, if one exists.
    pub fn current_session(&self) -> Option<DictationSession> {
        self.inner
            .session
            .lock()
            .expect("session mutex poisoned")
            .clone()
    }

    /// Start dictation.
    ///
    /// Captures the composer text as the session base, resets the elapsed
    /// counter and starts the backend. Returns `Unsupported` (and publishes a
    /// notice) when the host has no speech recognition.
    pub async fn start(&self) -> Result<StartOutcome, ConverseError> {
        if !self.inner.backend.is_supported() {
            tracing::warn!("Speech recognition unavailable");
            self.emit(DictationEvent::Notice(UNSUPPORTED_NOTICE.to_string()));
            return Ok(StartOutcome::Unsupported);
        }
        if self.is_listening() {
            return Ok(StartOutcome::AlreadyListening);
        }

        if self.phase() == DictationPhase::Idle || self.phase() == DictationPhase::Stopped {
            self.inner.state_machine.transition(DictationPhase::Listening)?;
        }

        let session = DictationSession::new(self.inner.input.get());
        tracing::info!(
            session_id = %session.id,
            base_len = session.session_base_text.len(),
            "Dictation session started"
        );
        *self.inner.session.lock().expect("session mutex poisoned") = Some(session);
        self.inner.elapsed_secs.store(0, Ordering::SeqCst);

        if let Err(e) = self.inner.backend.start().await {
            tracing::warn!(error = %e, "Speech backend failed to start");
            self.set_manual_stop();
            self.enter_stopped();
            self.emit(DictationEvent::Notice(format!(
                "Voice dictation could not start: {}",
                e
            )));
            return Err(e);
        }

        self.spawn_ticker();
        self.emit(DictationEvent::PhaseChanged(DictationPhase::Listening));
        Ok(StartOutcome::Started)
    }

    /// Stop dictation at the user's request.
    ///
    /// `manual_stop` is set before the backend is stopped so that the
    /// end-of-utterance callback that follows does not re-start it.
    pub async fn stop(&self) {
        if !self.is_listening() {
            return;
        }
        self.set_manual_stop();
        self.cancel_pending_restart();
        self.inner.backend.stop().await;
        self.enter_stopped();
        tracing::info!(elapsed_secs = self.elapsed_secs(), "Dictation stopped");
    }

    /// Backend callback: recognition is running.
    pub fn on_start(&self) {
        tracing::debug!(phase = %self.phase(), "Speech backend started");
    }

    /// Backend callback: a partial or final transcript for the current
    /// recognition run.
    pub async fn on_result(&self, transcript: &str) -> TranscriptOutcome {
        if !self.is_listening() || transcript.trim().is_empty() {
            return TranscriptOutcome::Ignored;
        }
        let base = match self.current_session() {
            Some(session) => session.session_base_text,
            None => return TranscriptOutcome::Ignored,
        };

        if let Some(trigger) = self.inner.matcher.detect(transcript) {
            let text = compose_text(&base, &trigger.cleaned);
            tracing::info!(phrase = %trigger.phrase, text_len = text.len(), "Trigger phrase recognized");
            self.publish_input(&text);
            self.stop().await;
            self.emit(DictationEvent::SubmitRequested(text.clone()));
            return TranscriptOutcome::Submit(text);
        }

        let candidate = compose_text(&base, transcript);
        self.publish_input(&candidate);
        TranscriptOutcome::Updated(candidate)
    }

    /// Backend callback: recognition ended.
    ///
    /// This is the single checkpoint that decides whether to re-start.
    pub async fn on_end(&self) {
        if self.phase() == DictationPhase::AutoRestarting {
            tracing::debug!("Duplicate end of utterance ignored; re-start already scheduled");
            return;
        }
        let manual_stop = self
            .current_session()
            .map(|s| s.manual_stop)
            .unwrap_or(true);

        if manual_stop || self.phase() != DictationPhase::Listening {
            self.enter_stopped();
            *self.inner.session.lock().expect("session mutex poisoned") = None;
            tracing::debug!("Dictation session closed");
            return;
        }

        if !self
            .inner
            .state_machine
            .transition_from(&[DictationPhase::Listening], DictationPhase::AutoRestarting)
        {
            return;
        }
        self.emit(DictationEvent::PhaseChanged(DictationPhase::AutoRestarting));

        let engine = self.clone();
        let delay = self.inner.restart_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.restart().await;
        });
        *self
            .inner
            .pending_restart
            .lock()
            .expect("restart mutex poisoned") = Some(handle);
    }

    /// Backend callback: recognition error.
    pub async fn on_error(&self, code: SpeechErrorCode) {
        if code.is_terminal() {
            tracing::warn!(code = ?code, "Microphone permission denied");
            self.set_manual_stop();
            self.cancel_pending_restart();
            self.enter_stopped();
            self.emit(DictationEvent::Notice(PERMISSION_NOTICE.to_string()));
            return;
        }
        match code {
            SpeechErrorCode::NoSpeech => tracing::debug!("No speech detected"),
            other => tracing::warn!(code = ?other, "Speech backend error"),
        }
    }

    // -- Private helpers --

    async fn restart(&self) {
        if self.phase() != DictationPhase::AutoRestarting {
            return;
        }
        let base = self.inner.input.get();
        let session_id = {
            let mut guard = self.inner.session.lock().expect("session mutex poisoned");
            match guard.as_mut() {
                Some(session) if !session.manual_stop => {
                    session.session_base_text = base;
                    session.restarts += 1;
                    session.id
                }
                _ => return,
            }
        };

        match self.inner.backend.start().await {
            Ok(()) => {
                if self.inner.state_machine.transition_from(
                    &[DictationPhase::AutoRestarting],
                    DictationPhase::Listening,
                ) {
                    tracing::debug!(session_id = %session_id, "Speech backend re-started");
                    self.emit(DictationEvent::PhaseChanged(DictationPhase::Listening));
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Speech backend re-start failed");
                self.set_manual_stop();
                self.enter_stopped();
                self.emit(DictationEvent::Notice(format!(
                    "Voice dictation stopped: {}",
                    e
                )));
            }
        }
    }

    fn spawn_ticker(&self) {
        let engine = self.clone();
        let interval = self.inner.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !engine.is_listening() {
                    break;
                }
                engine.inner.elapsed_secs.fetch_add(1, Ordering::SeqCst);
            }
        });
        let previous = self
            .inner
            .ticker
            .lock()
            .expect("ticker mutex poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn set_manual_stop(&self) {
        if let Some(session) = self
            .inner
            .session
            .lock()
            .expect("session mutex poisoned")
            .as_mut()
        {
            session.manual_stop = true;
        }
    }

    fn cancel_pending_restart(&self) {
        if let Some(handle) = self
            .inner
            .pending_restart
            .lock()
            .expect("restart mutex poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn enter_stopped(&self) {
        let moved = self.inner.state_machine.transition_from(
            &[DictationPhase::Listening, DictationPhase::AutoRestarting],
            DictationPhase::Stopped,
        );
        if let Some(handle) = self.inner.ticker.lock().expect("ticker mutex poisoned").take() {
            handle.abort();
        }
        if moved {
            self.emit(DictationEvent::PhaseChanged(DictationPhase::Stopped));
        }
    }

    fn publish_input(&self, text: &str) {
        self.inner.input.set(text);
        self.emit(DictationEvent::InputChanged(text.to_string()));
    }

    fn emit(&self, event: DictationEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

// =============================================================================
// Tests
// =============================================================================
