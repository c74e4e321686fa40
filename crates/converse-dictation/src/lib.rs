//! Converse Dictation crate - continuous voice dictation for the message composer.
//!
//! The engine wraps a speech-recognition backend that ends recognition on its
//! own after every utterance. It re-starts the backend until the user stops,
//! appends the live transcript to the text that was already in the composer,
//! and watches the transcript for spoken "send" trigger phrases.
//! Phases: Idle -> Listening <-> AutoRestarting -> Stopped.

pub mod backend;
pub mod engine;
pub mod state;
pub mod trigger;

pub use backend::{ManualSpeechBackend, SpeechBackend, SpeechErrorCode};
pub use engine::{
    compose_text, DictationEngine, DictationEvent, DictationSession, InputBuffer, StartOutcome,
    TranscriptOutcome,
};
pub use state::DictationPhase;
pub use trigger::{TriggerMatch, TriggerMatcher};
