//! Continuous speech capture with end-of-utterance detection
//!
//! Wraps a [`Recognizer`] session and turns its events into transcript
//! updates and a single "utterance complete" event per spoken request. An
//! utterance is considered finished when one of these happens:
//!
//! - the silence window expires after the last final result
//! - the recognizer reports `no-speech` while text is already accumulated
//! - the recognizer ends the session on its own
//!
//! Every transition into [`ListeningState::Idle`] cancels the silence window
//! and releases the recognizer.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

use super::silence::{DEFAULT_SILENCE_TIMEOUT, SilenceDetector, SilenceExpiry};
use super::transcript::{TranscriptBuffer, TranscriptSnapshot};
use crate::recognition::{
    RecognitionCapability, RecognitionErrorCode, RecognitionEvent, RecognitionSignal,
    RecognitionSink,
};
use crate::{Error, Result};

/// Capture behavior, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Quiet period after the last final result that ends an utterance
    pub silence_timeout: Duration,
    /// Emit completed utterances automatically
    pub auto_send: bool,
    /// Keep listening after an utterance is delivered
    pub continuous: bool,
    /// Treat `no-speech` as end of utterance when text is accumulated
    pub no_speech_completes: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            auto_send: true,
            continuous: true,
            no_speech_completes: true,
        }
    }
}

/// Listening session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    /// No session
    Idle,
    /// Session open, accumulating speech
    Listening,
    /// Delivering a completed utterance
    Processing,
}

/// Output of the capture engine
#[derive(Debug)]
pub enum CaptureEvent {
    /// Session state changed
    StateChanged(ListeningState),
    /// Transcript updated
    Transcript(TranscriptSnapshot),
    /// An utterance finished; carries all final segments in order
    UtteranceComplete(String),
    /// The recognizer heard nothing; the session keeps listening
    NoSpeech,
    /// The session failed; followed by the switch to idle
    Failed(Error),
}

/// Turns a continuous recognition session into utterances
pub struct SpeechCaptureEngine {
    config: CaptureConfig,
    capability: RecognitionCapability,
    state: ListeningState,
    session: u64,
    recognizer_active: bool,
    buffer: TranscriptBuffer,
    silence: SilenceDetector,
    silence_rx: mpsc::UnboundedReceiver<SilenceExpiry>,
    signal_tx: mpsc::UnboundedSender<RecognitionSignal>,
    signal_rx: mpsc::UnboundedReceiver<RecognitionSignal>,
    pending: VecDeque<CaptureEvent>,
}

impl SpeechCaptureEngine {
    /// Create an engine for a probed recognition capability
    #[must_use]
    pub fn new(capability: RecognitionCapability, config: CaptureConfig) -> Self {
        let (silence, silence_rx) = SilenceDetector::new(config.silence_timeout);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        if let RecognitionCapability::Unsupported { reason } = &capability {
            tracing::info!(reason = %reason, "speech recognition unavailable");
        }

        Self {
            config,
            capability,
            state: ListeningState::Idle,
            session: 0,
            recognizer_active: false,
            buffer: TranscriptBuffer::new(),
            silence,
            silence_rx,
            signal_tx,
            signal_rx,
            pending: VecDeque::new(),
        }
    }

    /// Open a listening session
    ///
    /// Starting while a session is open is a no-op. No silence window is
    /// armed until the first final result arrives.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` if the host has no recognizer, or the
    /// recognizer's error (typically `Error::Permission`) if it fails to start
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ListeningState::Idle {
            return Ok(());
        }

        self.session += 1;
        self.buffer.clear();
        self.silence.cancel();

        let sink = RecognitionSink::new(self.session, self.signal_tx.clone());
        let started = match &mut self.capability {
            RecognitionCapability::Unsupported { reason } => {
                return Err(Error::Unsupported(reason.clone()));
            }
            RecognitionCapability::Supported(recognizer) => {
                let result = recognizer.start(sink).await;
                if result.is_err() {
                    recognizer.stop();
                }
                result
            }
        };

        match started {
            Ok(()) => {
                self.recognizer_active = true;
                self.set_state(ListeningState::Listening);
                tracing::info!(session = self.session, "listening started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session = self.session, error = %e, "failed to start listening");
                Err(e)
            }
        }
    }

    /// Close the session and discard the utterance
    ///
    /// Idempotent: stopping an idle engine does nothing.
    pub fn stop(&mut self) {
        if self.state == ListeningState::Idle {
            return;
        }
        self.buffer.clear();
        self.enter_idle();
        tracing::info!(session = self.session, "listening stopped");
    }

    /// Stop when listening, start otherwise
    ///
    /// # Errors
    ///
    /// Returns the error from [`Self::start`]
    pub async fn toggle(&mut self) -> Result<()> {
        if self.is_listening() {
            self.stop();
            Ok(())
        } else {
            self.start().await
        }
    }

    /// Deliver the accumulated final text now, without waiting for silence
    pub fn take_transcript(&mut self) -> Option<String> {
        self.silence.cancel();
        let text = self.buffer.take_final();
        (!text.is_empty()).then_some(text)
    }

    /// Wait for the next capture event
    ///
    /// Returns `None` only if the engine's internal channels close, which
    /// cannot happen while the engine is alive.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        loop {
            self.process_ready();
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            tokio::select! {
                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal),
                Some(expiry) = self.silence_rx.recv() => self.handle_silence(expiry),
                else => return None,
            }
        }
    }

    /// Process signals that already arrived and return the resulting events
    pub fn drain_ready(&mut self) -> Vec<CaptureEvent> {
        self.process_ready();
        self.pending.drain(..).collect()
    }

    /// Handle queued recognition signals and silence expiries in the order
    /// they happened. An expiry wins a tie with a signal.
    fn process_ready(&mut self) {
        let mut signals = Vec::new();
        while let Ok(signal) = self.signal_rx.try_recv() {
            signals.push(signal);
        }
        let mut expiries = Vec::new();
        while let Ok(expiry) = self.silence_rx.try_recv() {
            expiries.push(expiry);
        }

        let mut signals = signals.into_iter().peekable();
        let mut expiries = expiries.into_iter().peekable();
        loop {
            let expiry_first = match (signals.peek(), expiries.peek()) {
                (None, None) => break,
                (Some(signal), Some(expiry)) => expiry.fired_at() <= signal.received_at,
                (None, Some(_)) => true,
                (Some(_), None) => false,
            };
            if expiry_first {
                if let Some(expiry) = expiries.next() {
                    self.handle_silence(expiry);
                }
            } else if let Some(signal) = signals.next() {
                self.handle_signal(signal);
            }
        }
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> ListeningState {
        self.state
    }

    /// Whether a session is open
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state != ListeningState::Idle
    }

    /// Whether the host can recognize speech
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.capability.is_supported()
    }

    /// Whether the silence window is armed
    #[must_use]
    pub const fn is_silence_armed(&self) -> bool {
        self.silence.is_armed()
    }

    /// Current utterance text
    #[must_use]
    pub fn transcript(&self) -> TranscriptSnapshot {
        self.buffer.snapshot()
    }

    /// Whether events are waiting to be returned by [`Self::next_event`]
    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn handle_signal(&mut self, signal: RecognitionSignal) {
        if signal.session != self.session || self.state == ListeningState::Idle {
            tracing::trace!(
                session = signal.session,
                current = self.session,
                "dropping recognition event from closed session"
            );
            return;
        }

        match signal.event {
            RecognitionEvent::Result {
                transcript,
                is_final,
            } => self.handle_result(&transcript, is_final),
            RecognitionEvent::Error(code) => self.handle_error(code),
            RecognitionEvent::End => self.handle_end(),
        }
    }

    fn handle_result(&mut self, transcript: &str, is_final: bool) {
        if is_final {
            self.buffer.append_final(transcript);
            self.silence.arm();
            tracing::debug!(segment = transcript, "final result");
        } else {
            self.buffer.set_interim(transcript);
            // Still talking: push the deadline out if one is pending
            if self.silence.is_armed() {
                self.silence.arm();
            }
        }
        self.pending
            .push_back(CaptureEvent::Transcript(self.buffer.snapshot()));
    }

    fn handle_error(&mut self, code: RecognitionErrorCode) {
        match code {
            RecognitionErrorCode::NoSpeech => {
                if self.buffer.has_final() {
                    if self.config.no_speech_completes && self.config.auto_send {
                        tracing::debug!("no-speech after speech, treating as end of utterance");
                        self.complete_utterance();
                    }
                } else {
                    tracing::debug!("no speech detected");
                    self.pending.push_back(CaptureEvent::NoSpeech);
                }
            }
            RecognitionErrorCode::Aborted => {
                tracing::debug!(session = self.session, "recognition aborted");
                self.buffer.clear();
                self.enter_idle();
            }
            code if code.is_permission() => {
                tracing::warn!(code = %code, "microphone access denied");
                self.buffer.clear();
                self.pending.push_back(CaptureEvent::Failed(Error::Permission(format!(
                    "microphone access denied ({code})"
                ))));
                self.enter_idle();
            }
            code => {
                tracing::error!(code = %code, "recognition failed");
                self.buffer.clear();
                self.pending.push_back(CaptureEvent::Failed(Error::Capture(format!(
                    "recognition failed: {code}"
                ))));
                self.enter_idle();
            }
        }
    }

    fn handle_end(&mut self) {
        tracing::debug!(session = self.session, "recognition session ended");
        self.silence.cancel();
        if self.config.auto_send && self.buffer.has_final() {
            let text = self.buffer.take_final();
            self.set_state(ListeningState::Processing);
            tracing::info!(chars = text.len(), "utterance complete at session end");
            self.pending.push_back(CaptureEvent::UtteranceComplete(text));
        }
        self.enter_idle();
    }

    fn handle_silence(&mut self, expiry: SilenceExpiry) {
        if !self.silence.claim(expiry) || self.state != ListeningState::Listening {
            return;
        }
        if self.config.auto_send && self.buffer.has_final() {
            self.complete_utterance();
        } else {
            tracing::debug!("silence window elapsed, waiting for manual send");
        }
    }

    fn complete_utterance(&mut self) {
        self.silence.cancel();
        let text = self.buffer.take_final();
        if text.is_empty() {
            return;
        }

        self.set_state(ListeningState::Processing);
        tracing::info!(chars = text.len(), "utterance complete");
        self.pending.push_back(CaptureEvent::UtteranceComplete(text));

        if self.config.continuous {
            self.set_state(ListeningState::Listening);
        } else {
            self.enter_idle();
        }
    }

    fn enter_idle(&mut self) {
        self.silence.cancel();
        self.release_recognizer();
        self.set_state(ListeningState::Idle);
    }

    fn release_recognizer(&mut self) {
        if !self.recognizer_active {
            return;
        }
        if let RecognitionCapability::Supported(recognizer) = &mut self.capability {
            recognizer.stop();
        }
        self.recognizer_active = false;
    }

    fn set_state(&mut self, state: ListeningState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "listening state");
            self.state = state;
            self.pending.push_back(CaptureEvent::StateChanged(state));
        }
    }
}

impl Drop for SpeechCaptureEngine {
    fn drop(&mut self) {
        self.release_recognizer();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::recognition::Recognizer;

    #[derive(Default)]
    struct Probe {
        sink: Option<RecognitionSink>,
        stops: usize,
    }

    struct ProbeRecognizer(Arc<Mutex<Probe>>);

    #[async_trait]
    impl Recognizer for ProbeRecognizer {
        async fn start(&mut self, sink: RecognitionSink) -> Result<()> {
            self.0.lock().unwrap().sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().stops += 1;
        }
    }

    fn engine(config: CaptureConfig) -> (SpeechCaptureEngine, Arc<Mutex<Probe>>) {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let capability = RecognitionCapability::supported(ProbeRecognizer(Arc::clone(&probe)));
        (SpeechCaptureEngine::new(capability, config), probe)
    }

    fn sink(probe: &Arc<Mutex<Probe>>) -> RecognitionSink {
        probe.lock().unwrap().sink.clone().unwrap()
    }

    #[tokio::test]
    async fn unsupported_host_fails_start() {
        let mut engine = SpeechCaptureEngine::new(
            RecognitionCapability::unsupported("no recognizer"),
            CaptureConfig::default(),
        );
        assert!(matches!(engine.start().await, Err(Error::Unsupported(_))));
        assert_eq!(engine.state(), ListeningState::Idle);
    }

    #[tokio::test]
    async fn start_does_not_arm_silence() {
        let (mut engine, _probe) = engine(CaptureConfig::default());
        engine.start().await.unwrap();
        assert_eq!(engine.state(), ListeningState::Listening);
        assert!(!engine.is_silence_armed());
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let (mut engine, probe) = engine(CaptureConfig::default());
        engine.stop();
        assert!(engine.drain_ready().is_empty());
        assert_eq!(probe.lock().unwrap().stops, 0);
    }

    #[tokio::test]
    async fn stop_releases_recognizer_once() {
        let (mut engine, probe) = engine(CaptureConfig::default());
        engine.start().await.unwrap();
        sink(&probe).result("hello", true);
        engine.drain_ready();
        assert!(engine.is_silence_armed());

        engine.stop();
        engine.stop();
        assert_eq!(probe.lock().unwrap().stops, 1);
        assert!(!engine.is_silence_armed());
        assert!(engine.transcript().final_text.is_empty());
    }

    #[tokio::test]
    async fn events_from_closed_session_are_dropped() {
        let (mut engine, probe) = engine(CaptureConfig::default());
        engine.start().await.unwrap();
        let old = sink(&probe);
        engine.stop();
        engine.start().await.unwrap();
        engine.drain_ready();

        old.result("stale", true);
        assert!(engine.drain_ready().is_empty());
        assert!(engine.transcript().final_text.is_empty());
    }

    #[tokio::test]
    async fn take_transcript_sends_manually() {
        let (mut engine, probe) = engine(CaptureConfig {
            auto_send: false,
            ..CaptureConfig::default()
        });
        engine.start().await.unwrap();
        sink(&probe).result("turn on the lights", true);
        engine.drain_ready();

        assert_eq!(engine.take_transcript().as_deref(), Some("turn on the lights"));
        assert!(engine.take_transcript().is_none());
        assert!(!engine.is_silence_armed());
    }
}
