//! Ties capture and output to the conversation
//!
//! The controller hands each completed utterance to an [`UtteranceConsumer`]
//! and speaks whatever text it is asked to. It never decides the response
//! itself.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::Notice;
use super::capture::{CaptureEvent, SpeechCaptureEngine};
use super::output::{SpeechEvent, SpeechOutputEngine};
use crate::{Error, Result};

/// Receives finished utterances
pub trait UtteranceConsumer: Send + Sync {
    /// Called once per completed utterance with its full text
    fn on_utterance_complete(&self, text: &str);
}

impl<F> UtteranceConsumer for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_utterance_complete(&self, text: &str) {
        self(text);
    }
}

/// Snapshot for rendering voice controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStatus {
    /// A listening session is open
    pub listening: bool,
    /// Audio is playing
    pub speaking: bool,
    /// Playback is paused
    pub paused: bool,
    /// Transcript so far, final text followed by the interim guess
    pub transcript_preview: String,
}

/// Anything the controller reports
#[derive(Debug)]
pub enum ControllerEvent {
    /// From the capture engine
    Capture(CaptureEvent),
    /// From the output engine
    Speech(SpeechEvent),
    /// Actionable message for the user
    Notice(Notice),
}

/// Voice front end for a conversation
pub struct VoiceInteractionController {
    capture: SpeechCaptureEngine,
    output: SpeechOutputEngine,
    speech_rx: mpsc::UnboundedReceiver<SpeechEvent>,
    consumer: Option<Arc<dyn UtteranceConsumer>>,
    pending: VecDeque<ControllerEvent>,
}

impl VoiceInteractionController {
    /// Create a controller over both engines
    #[must_use]
    pub fn new(
        capture: SpeechCaptureEngine,
        output: SpeechOutputEngine,
        speech_rx: mpsc::UnboundedReceiver<SpeechEvent>,
    ) -> Self {
        Self {
            capture,
            output,
            speech_rx,
            consumer: None,
            pending: VecDeque::new(),
        }
    }

    /// Register the consumer for completed utterances
    #[must_use]
    pub fn with_consumer(mut self, consumer: Arc<dyn UtteranceConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Replace the consumer for completed utterances
    pub fn set_consumer(&mut self, consumer: Arc<dyn UtteranceConsumer>) {
        self.consumer = Some(consumer);
    }

    /// Start or stop listening
    ///
    /// Starting interrupts any speech in progress so the user can talk over
    /// the assistant.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` or `Error::Permission` when listening
    /// cannot start; a matching [`Notice`] is also queued
    pub async fn toggle_listening(&mut self) -> Result<()> {
        if self.capture.is_listening() {
            self.capture.stop();
            return Ok(());
        }
        self.start_listening().await
    }

    /// Open a listening session, interrupting speech
    ///
    /// # Errors
    ///
    /// Same as [`Self::toggle_listening`]
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.output.is_active() {
            tracing::debug!("barge-in: stopping speech to listen");
            self.output.stop();
        }

        let result = self.capture.start().await;
        if let Err(e) = &result {
            let notice = match e {
                Error::Permission(_) => Some(Notice::MicrophoneDenied),
                Error::Unsupported(reason) => Some(Notice::Unsupported(reason.clone())),
                _ => None,
            };
            tracing::warn!(error = %e, "could not start listening");
            if let Some(notice) = notice {
                self.pending.push_back(ControllerEvent::Notice(notice));
            }
        }
        result
    }

    /// Close the listening session
    pub fn stop_listening(&mut self) {
        self.capture.stop();
    }

    /// Speak a response; see [`SpeechOutputEngine::speak`]
    pub fn request_speak(&self, text: &str) -> bool {
        self.output.speak(text)
    }

    /// Stop any speech
    pub fn stop_speaking(&self) {
        self.output.stop();
    }

    /// Pause or resume speech
    pub fn toggle_pause(&self) -> bool {
        self.output.toggle_pause()
    }

    /// Deliver the accumulated transcript now instead of waiting for silence
    ///
    /// Returns `false` when there is nothing to send.
    pub fn send_now(&mut self) -> bool {
        let Some(text) = self.capture.take_transcript() else {
            return false;
        };
        self.deliver(&text);
        self.pending
            .push_back(ControllerEvent::Capture(CaptureEvent::UtteranceComplete(text)));
        true
    }

    /// Current voice status
    #[must_use]
    pub fn status(&self) -> VoiceStatus {
        VoiceStatus {
            listening: self.capture.is_listening(),
            speaking: self.output.is_speaking(),
            paused: self.output.is_paused(),
            transcript_preview: self.capture.transcript().preview(),
        }
    }

    /// Whether nothing is listening, no speech is queued, playing or paused,
    /// and every event has been handed out
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && !self.capture.has_pending_events()
            && self.speech_rx.is_empty()
            && !self.capture.is_listening()
            && !self.output.is_active()
    }

    /// Capture engine
    #[must_use]
    pub const fn capture(&self) -> &SpeechCaptureEngine {
        &self.capture
    }

    /// Output engine handle
    #[must_use]
    pub const fn output(&self) -> &SpeechOutputEngine {
        &self.output
    }

    /// Wait for the next event from either engine
    ///
    /// Completed utterances reach the consumer before they are returned.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            tokio::select! {
                Some(event) = self.capture.next_event() => self.on_capture(event),
                Some(event) = self.speech_rx.recv() => self.on_speech(event),
                else => return None,
            }
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        let notice = match &event {
            CaptureEvent::UtteranceComplete(text) => {
                self.deliver(text);
                None
            }
            CaptureEvent::Failed(Error::Permission(_)) => Some(Notice::MicrophoneDenied),
            CaptureEvent::Failed(Error::Unsupported(reason)) => {
                Some(Notice::Unsupported(reason.clone()))
            }
            _ => None,
        };
        self.pending.push_back(ControllerEvent::Capture(event));
        if let Some(notice) = notice {
            self.pending.push_back(ControllerEvent::Notice(notice));
        }
    }

    fn on_speech(&mut self, event: SpeechEvent) {
        let event = match event {
            SpeechEvent::Notice(notice) => ControllerEvent::Notice(notice),
            other => ControllerEvent::Speech(other),
        };
        self.pending.push_back(event);
    }

    fn deliver(&self, text: &str) {
        tracing::info!(chars = text.len(), "utterance complete");
        match &self.consumer {
            Some(consumer) => consumer.on_utterance_complete(text),
            None => tracing::debug!("no utterance consumer registered"),
        }
    }
}

impl fmt::Debug for VoiceInteractionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceInteractionController")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::recognition::RecognitionCapability;
    use crate::synthesis::SynthesisProviderChain;
    use crate::voice::CaptureConfig;

    fn controller() -> VoiceInteractionController {
        let capture = SpeechCaptureEngine::new(
            RecognitionCapability::unsupported("no microphone"),
            CaptureConfig::default(),
        );
        let (output, speech_rx) =
            SpeechOutputEngine::new(Arc::new(SynthesisProviderChain::new(Vec::new())));
        VoiceInteractionController::new(capture, output, speech_rx)
    }

    #[tokio::test]
    async fn unsupported_host_yields_notice() {
        let mut controller = controller();
        let err = controller.toggle_listening().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));

        match controller.next_event().await {
            Some(ControllerEvent::Notice(Notice::Unsupported(reason))) => {
                assert_eq!(reason, "no microphone");
            }
            other => panic!("expected unsupported notice, got {other:?}"),
        }
        assert!(!controller.status().listening);
    }

    #[tokio::test]
    async fn send_now_without_text_is_noop() {
        let delivered = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&delivered);
        let mut controller = controller().with_consumer(Arc::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string());
        }));

        assert!(!controller.send_now());
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn speaking_with_no_providers_fails() {
        let mut controller = controller();
        assert!(controller.request_speak("hello"));

        let mut failed = false;
        while let Some(event) = controller.next_event().await {
            if let ControllerEvent::Speech(SpeechEvent::Failed { error, .. }) = event {
                assert!(matches!(error, Error::Synthesis(_)));
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert!(!controller.status().speaking);
    }

    #[test]
    fn notice_messages_are_actionable() {
        assert!(Notice::MicrophoneDenied
            .message()
            .contains("enable microphone access"));
    }
}
