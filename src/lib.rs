//! Beacon Voice - hands-free voice conversation pipeline
//!
//! This library provides the voice front end for a conversational assistant:
//! - Continuous speech capture with silence-based end-of-utterance detection
//! - Spoken responses through an ordered chain of synthesis providers
//! - A controller that hands utterances to the conversation and speaks replies
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            VoiceInteractionController               │
//! │   toggle listening │ request speak │ status/events  │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼────────────┐
//! │ SpeechCaptureEngine │       │  SpeechOutputEngine   │
//! │ transcript, silence │       │ one task, pause/stop  │
//! └──────────┬──────────┘       └──────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼────────────┐
//! │     Recognizer      │       │ SynthesisProviderChain│
//! │ mic, segmenter, STT │       │   remote → local      │
//! └─────────────────────┘       └───────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod recognition;
pub mod synthesis;
pub mod voice;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use providers::{CredentialStore, LayeredKeyStore, LocalKeyStore, MemoryKeyStore};
pub use voice::{
    CaptureConfig, CaptureEvent, ControllerEvent, ListeningState, Notice, SpeechCaptureEngine,
    SpeechEvent, SpeechOutputEngine, UtteranceConsumer, VoiceInteractionController, VoiceStatus,
};
