//! Shared test utilities
//!
//! Scripted recognizer and synthesis providers so the pipeline can be driven
//! without audio hardware or network access.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use beacon_voice::recognition::{
    RecognitionCapability, RecognitionErrorCode, RecognitionSink, Recognizer,
};
use beacon_voice::synthesis::{
    PlaybackCompletion, PlaybackControl, PlaybackHandle, ProviderId, SynthesisProvider,
    SynthesisProviderChain,
};
use beacon_voice::voice::{
    CaptureConfig, SpeechCaptureEngine, SpeechEvent, SpeechOutputEngine,
    VoiceInteractionController,
};
use beacon_voice::{Error, Result};

/// Test-side view of a [`FakeRecognizer`]
#[derive(Clone, Default)]
pub struct RecognizerProbe {
    sink: Arc<Mutex<Option<RecognitionSink>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl RecognizerProbe {
    /// Whether a session is running
    pub fn is_running(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Sink of the running session
    pub fn sink(&self) -> RecognitionSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("no recognition session running")
    }

    pub fn final_result(&self, text: &str) {
        self.sink().result(text, true);
    }

    pub fn interim_result(&self, text: &str) {
        self.sink().result(text, false);
    }

    pub fn error(&self, code: RecognitionErrorCode) {
        self.sink().error(code);
    }

    pub fn end(&self) {
        self.sink().end();
    }
}

/// Recognizer driven by a [`RecognizerProbe`]
pub struct FakeRecognizer {
    probe: RecognizerProbe,
    deny: bool,
}

impl FakeRecognizer {
    pub fn new() -> (Self, RecognizerProbe) {
        let probe = RecognizerProbe::default();
        let recognizer = Self {
            probe: probe.clone(),
            deny: false,
        };
        (recognizer, probe)
    }

    /// Recognizer whose start fails as if the microphone were denied
    pub fn denied() -> Self {
        Self {
            probe: RecognizerProbe::default(),
            deny: true,
        }
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn start(&mut self, sink: RecognitionSink) -> Result<()> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(Error::Permission("not-allowed".to_string()));
        }
        *self.probe.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if self.probe.sink.lock().unwrap().take().is_some() {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Capture engine over a fresh [`FakeRecognizer`]
pub fn capture_engine(config: CaptureConfig) -> (SpeechCaptureEngine, RecognizerProbe) {
    let (recognizer, probe) = FakeRecognizer::new();
    let engine = SpeechCaptureEngine::new(RecognitionCapability::supported(recognizer), config);
    (engine, probe)
}

/// State of one fake playback
#[derive(Clone, Default)]
pub struct PlaybackProbe {
    stopped: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl PlaybackProbe {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

struct FakeControl(PlaybackProbe);

impl PlaybackControl for FakeControl {
    fn pause(&mut self) -> Result<()> {
        self.0.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.0.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

struct Started {
    text: String,
    probe: PlaybackProbe,
    completion: Option<PlaybackCompletion>,
}

/// Synthesis provider with scripted outcomes
///
/// Successful playbacks run until the test finishes them.
pub struct FakeProvider {
    id: ProviderId,
    available: AtomicBool,
    failing: AtomicBool,
    calls: Mutex<Vec<String>>,
    playbacks: Mutex<Vec<Started>>,
}

impl FakeProvider {
    pub fn new(id: ProviderId) -> Arc<Self> {
        Arc::new(Self {
            id,
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            playbacks: Mutex::new(Vec::new()),
        })
    }

    /// Provider whose speak rejects with a network error
    pub fn failing(id: ProviderId) -> Arc<Self> {
        let provider = Self::new(id);
        provider.set_failing(true);
        provider
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Texts passed to speak, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Probes of every playback started so far
    pub fn playbacks(&self) -> Vec<PlaybackProbe> {
        self.playbacks
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.probe.clone())
            .collect()
    }

    /// Text of every playback started so far
    pub fn played(&self) -> Vec<String> {
        self.playbacks
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.text.clone())
            .collect()
    }

    /// Finish the most recent playback with `outcome`
    pub fn finish_latest(&self, outcome: Result<()>) {
        let completion = self
            .playbacks
            .lock()
            .unwrap()
            .last_mut()
            .and_then(|p| p.completion.take())
            .expect("no unfinished playback");
        completion.finish(outcome);
    }
}

#[async_trait]
impl SynthesisProvider for FakeProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn speak(&self, text: &str) -> Result<PlaybackHandle> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Provider("network error".to_string()));
        }

        let probe = PlaybackProbe::default();
        let (handle, completion) = PlaybackHandle::new(FakeControl(probe.clone()));
        self.playbacks.lock().unwrap().push(Started {
            text: text.to_string(),
            probe,
            completion: Some(completion),
        });
        Ok(handle)
    }
}

/// Output engine over the given providers in default order
pub fn output_engine(
    providers: &[Arc<FakeProvider>],
) -> (SpeechOutputEngine, mpsc::UnboundedReceiver<SpeechEvent>) {
    let providers = providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn SynthesisProvider>)
        .collect();
    SpeechOutputEngine::new(Arc::new(SynthesisProviderChain::new(providers)))
}

/// Controller wired to fakes, recording delivered utterances
pub struct Harness {
    pub controller: VoiceInteractionController,
    pub recognizer: RecognizerProbe,
    pub primary: Arc<FakeProvider>,
    pub secondary: Arc<FakeProvider>,
    pub delivered: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new(config: CaptureConfig) -> Self {
        let (capture, recognizer) = capture_engine(config);
        let primary = FakeProvider::new(ProviderId::Primary);
        let secondary = FakeProvider::new(ProviderId::Secondary);
        let (output, speech_rx) = output_engine(&[Arc::clone(&primary), Arc::clone(&secondary)]);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let consumer = move |text: &str| sink.lock().unwrap().push(text.to_string());
        let controller = VoiceInteractionController::new(capture, output, speech_rx)
            .with_consumer(Arc::new(consumer));

        Self {
            controller,
            recognizer,
            primary,
            secondary,
            delivered,
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

/// Receive speech events until a terminal one, inclusive
pub async fn speech_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<SpeechEvent>,
) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = matches!(
            event,
            SpeechEvent::Ended { .. } | SpeechEvent::Failed { .. }
        );
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
