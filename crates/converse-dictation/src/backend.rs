//! Speech-recognition backend contract.
//!
//! The backend runs continuous recognition and reports through four callbacks
//! (`on_start`, `on_result`, `on_end`, `on_error`) that the host forwards to
//! [`DictationEngine`](crate::engine::DictationEngine). Hosts without speech
//! recognition report `is_supported() == false`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use converse_core::error::ConverseError;

/// Error codes reported by a speech backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechErrorCode {
    /// Microphone permission denied. Ends the dictation session.
    NotAllowed,
    /// Nothing was heard before the backend timed out. Continuation is left
    /// to the end-of-utterance restart.
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    Other,
}

impl SpeechErrorCode {
    /// Map a backend error string (e.g. `"not-allowed"`) to a code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" | "service-not-allowed" => SpeechErrorCode::NotAllowed,
            "no-speech" => SpeechErrorCode::NoSpeech,
            "aborted" => SpeechErrorCode::Aborted,
            "audio-capture" => SpeechErrorCode::AudioCapture,
            "network" => SpeechErrorCode::Network,
            _ => SpeechErrorCode::Other,
        }
    }

    /// Whether the error ends the current dictation session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SpeechErrorCode::NotAllowed)
    }
}

/// A continuous speech-recognition session provider.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Whether the host environment offers speech recognition at all.
    fn is_supported(&self) -> bool;

    /// Begin recognition. Transcripts arrive through the engine callbacks.
    async fn start(&self) -> Result<(), ConverseError>;

    /// End recognition. The backend reports `on_end` afterwards.
    async fn stop(&self);
}

/// Backend driven by hand: the host feeds transcripts and end-of-utterance
/// signals itself. Records how often it was started and stopped.
#[derive(Debug)]
pub struct ManualSpeechBackend {
    supported: bool,
    fail_start: AtomicBool,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Default for ManualSpeechBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualSpeechBackend {
    pub fn new() -> Self {
        Self {
            supported: true,
            fail_start: AtomicBool::new(false),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// A backend for hosts without speech recognition.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Make subsequent `start()` calls fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for ManualSpeechBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn start(&self) -> Result<(), ConverseError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ConverseError::Speech("recognizer failed to start".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Tests
// =============================================================================
