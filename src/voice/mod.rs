//! Voice interaction pipeline
//!
//! Capture turns a recognition session into utterances, output speaks
//! responses through the provider chain, and the controller ties both to the
//! conversation.

mod capture;
mod controller;
mod output;
mod silence;
mod transcript;

use std::fmt;

use crate::synthesis::ProviderId;

pub use capture::{CaptureConfig, CaptureEvent, ListeningState, SpeechCaptureEngine};
pub use controller::{ControllerEvent, UtteranceConsumer, VoiceInteractionController, VoiceStatus};
pub use output::{EndReason, SpeechEvent, SpeechOutputEngine, SpeechTask, TaskId, TaskStatus};
pub use silence::{DEFAULT_SILENCE_TIMEOUT, SilenceDetector, SilenceExpiry};
pub use transcript::{TranscriptBuffer, TranscriptSnapshot};

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Speech continued on a lower-priority provider
    ProviderFallback {
        /// Provider that failed
        from: ProviderId,
        /// Provider now speaking
        to: ProviderId,
    },
    /// Microphone access was refused
    MicrophoneDenied,
    /// Speech recognition is not available on this host
    Unsupported(String),
}

impl Notice {
    /// User-facing message
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ProviderFallback { from, to } => {
                format!("{from} voice unavailable, continuing with {to} voice")
            }
            Self::MicrophoneDenied => {
                "Microphone access denied; enable microphone access and try again".to_string()
            }
            Self::Unsupported(reason) => format!("Voice input is not supported here: {reason}"),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
