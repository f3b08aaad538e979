//! Speech recognition providers
//!
//! The capture engine only talks to the [`Recognizer`] trait. Whether a host
//! can recognize speech at all is decided once, at construction, and carried
//! as a [`RecognitionCapability`].

mod cloud;
mod microphone;
mod segmenter;
mod transcriber;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::Result;

pub use cloud::{CloudRecognizer, CloudRecognizerConfig};
pub use microphone::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use segmenter::{SegmenterConfig, SegmenterOutput, UtteranceSegmenter};
pub use transcriber::{SttBackend, Transcriber};

/// Error codes a recognition session can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorCode {
    /// No speech was heard; often raised on natural pauses
    NoSpeech,
    /// Session aborted
    Aborted,
    /// Microphone could not be captured
    AudioCapture,
    /// Recognition service unreachable
    Network,
    /// Microphone access denied by the user
    NotAllowed,
    /// Recognition service refused the session
    ServiceNotAllowed,
    /// Any other provider-specific code
    Other(String),
}

impl RecognitionErrorCode {
    /// Parse a provider error code string
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this code means the user denied access
    #[must_use]
    pub const fn is_permission(&self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceNotAllowed)
    }
}

impl fmt::Display for RecognitionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::AudioCapture => "audio-capture",
            Self::Network => "network",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::Other(code) => code,
        };
        f.write_str(code)
    }
}

/// Event emitted by a recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A recognized fragment
    Result {
        /// Recognized text
        transcript: String,
        /// Whether the fragment is stable
        is_final: bool,
    },
    /// The session reported an error
    Error(RecognitionErrorCode),
    /// The session ended on its own
    End,
}

/// Recognition event tagged with the session that produced it
#[derive(Debug, Clone)]
pub struct RecognitionSignal {
    /// Session id assigned by the capture engine
    pub session: u64,
    /// The event
    pub event: RecognitionEvent,
    /// When the recognizer delivered it
    pub received_at: Instant,
}

/// Where a running recognizer delivers its events
///
/// Each sink is bound to one listening session. Events sent after the
/// session ended are discarded by the capture engine.
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    session: u64,
    tx: mpsc::UnboundedSender<RecognitionSignal>,
}

impl RecognitionSink {
    /// Create a sink for a session
    #[must_use]
    pub const fn new(session: u64, tx: mpsc::UnboundedSender<RecognitionSignal>) -> Self {
        Self { session, tx }
    }

    /// Session this sink belongs to
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Deliver an event; returns `false` if the engine is gone
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        self.tx
            .send(RecognitionSignal {
                session: self.session,
                event,
                received_at: Instant::now(),
            })
            .is_ok()
    }

    /// Deliver an interim or final result
    pub fn result(&self, transcript: impl Into<String>, is_final: bool) -> bool {
        self.emit(RecognitionEvent::Result {
            transcript: transcript.into(),
            is_final,
        })
    }

    /// Deliver an error code
    pub fn error(&self, code: RecognitionErrorCode) -> bool {
        self.emit(RecognitionEvent::Error(code))
    }

    /// Deliver a natural end of session
    pub fn end(&self) -> bool {
        self.emit(RecognitionEvent::End)
    }
}

/// A continuous speech recognition engine
#[async_trait]
pub trait Recognizer: Send {
    /// Start a session delivering events to `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if the microphone is denied, or
    /// `Error::Capture` if the session cannot be opened
    async fn start(&mut self, sink: RecognitionSink) -> Result<()>;

    /// Stop the running session and release the microphone
    ///
    /// Must be safe to call when no session is running.
    fn stop(&mut self);
}

/// Outcome of probing the host for recognition support
pub enum RecognitionCapability {
    /// A recognizer is available
    Supported(Box<dyn Recognizer>),
    /// No recognizer; `reason` is shown to the user
    Unsupported {
        /// Why recognition is unavailable
        reason: String,
    },
}

impl RecognitionCapability {
    /// Wrap a recognizer
    #[must_use]
    pub fn supported(recognizer: impl Recognizer + 'static) -> Self {
        Self::Supported(Box::new(recognizer))
    }

    /// Mark recognition unavailable
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Whether a recognizer is present
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::Supported(_))
    }
}

impl fmt::Debug for RecognitionCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supported(_) => f.write_str("Supported"),
            Self::Unsupported { reason } => {
                f.debug_struct("Unsupported").field("reason", reason).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip_through_display() {
        for code in ["no-speech", "aborted", "audio-capture", "network", "not-allowed"] {
            assert_eq!(RecognitionErrorCode::from_code(code).to_string(), code);
        }
        assert_eq!(
            RecognitionErrorCode::from_code("bad-grammar"),
            RecognitionErrorCode::Other("bad-grammar".to_string())
        );
    }

    #[test]
    fn permission_codes() {
        assert!(RecognitionErrorCode::NotAllowed.is_permission());
        assert!(RecognitionErrorCode::ServiceNotAllowed.is_permission());
        assert!(!RecognitionErrorCode::NoSpeech.is_permission());
    }

    #[test]
    fn sink_tags_events_with_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RecognitionSink::new(7, tx);
        assert!(sink.result("hello", true));
        assert!(sink.end());

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.session, 7);
        assert_eq!(
            signal.event,
            RecognitionEvent::Result {
                transcript: "hello".to_string(),
                is_final: true
            }
        );
        assert_eq!(rx.try_recv().unwrap().event, RecognitionEvent::End);
    }

    #[test]
    fn sink_reports_closed_engine() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = RecognitionSink::new(1, tx);
        drop(rx);
        assert!(!sink.error(RecognitionErrorCode::Network));
    }
}
