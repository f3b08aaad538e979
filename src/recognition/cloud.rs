//! Host recognizer: microphone, segmenter and a transcription API
//!
//! A capture thread owns the cpal stream (not `Send`) and cuts the input
//! into phrases. A tokio task transcribes each phrase in order and reports
//! it to the session sink as a final result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::microphone::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::segmenter::{SegmenterConfig, SegmenterOutput, UtteranceSegmenter};
use super::transcriber::Transcriber;
use super::{RecognitionCapability, RecognitionErrorCode, RecognitionSink, Recognizer};
use crate::{Error, Result};

/// Cloud recognizer settings
#[derive(Debug, Clone, PartialEq)]
pub struct CloudRecognizerConfig {
    /// Phrase detection thresholds
    pub segmenter: SegmenterConfig,
    /// Close the session after this long; `None` keeps it open until stopped
    pub max_session: Option<Duration>,
    /// How often the capture thread drains the microphone buffer
    pub poll_interval: Duration,
}

impl Default for CloudRecognizerConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            max_session: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What the capture thread hands to the transcription task
enum Captured {
    Phrase(Vec<f32>),
    Quiet,
    Closed,
}

struct Session {
    stop: Arc<AtomicBool>,
    worker: tokio::task::JoinHandle<()>,
}

/// Recognizer backed by the default microphone and a transcription API
pub struct CloudRecognizer {
    config: CloudRecognizerConfig,
    transcriber: Arc<Transcriber>,
    session: Option<Session>,
}

impl CloudRecognizer {
    /// Create a recognizer
    #[must_use]
    pub fn new(config: CloudRecognizerConfig, transcriber: Transcriber) -> Self {
        Self {
            config,
            transcriber: Arc::new(transcriber),
            session: None,
        }
    }

    /// Probe the host and wrap a recognizer if it can work here
    ///
    /// Requires a transcription API key and an input device.
    #[must_use]
    pub fn detect(config: CloudRecognizerConfig, transcriber: Transcriber) -> RecognitionCapability {
        if !transcriber.is_configured() {
            return RecognitionCapability::unsupported(format!(
                "no {} API key configured for speech-to-text",
                transcriber.backend().credential_name()
            ));
        }
        if !AudioCapture::has_input_device() {
            return RecognitionCapability::unsupported("no microphone found");
        }
        RecognitionCapability::supported(Self::new(config, transcriber))
    }
}

#[async_trait]
impl Recognizer for CloudRecognizer {
    async fn start(&mut self, sink: RecognitionSink) -> Result<()> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();

        let thread_stop = Arc::clone(&stop);
        let config = self.config.clone();
        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(&config, &thread_stop, ready_tx, &captured_tx))?;

        ready_rx
            .await
            .map_err(|_| Error::Capture("capture thread exited before starting".to_string()))??;

        let transcriber = Arc::clone(&self.transcriber);
        let worker = tokio::spawn(transcribe_loop(transcriber, captured_rx, sink));

        self.session = Some(Session { stop, worker });
        tracing::debug!("cloud recognition session started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.store(true, Ordering::SeqCst);
            session.worker.abort();
            tracing::debug!("cloud recognition session stopped");
        }
    }
}

impl Drop for CloudRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_microphone() -> Result<AudioCapture> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;
    Ok(capture)
}

/// Capture thread body
fn run_capture(
    config: &CloudRecognizerConfig,
    stop: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
    captured: &mpsc::UnboundedSender<Captured>,
) {
    let mut capture = match open_microphone() {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut segmenter = UtteranceSegmenter::new(&config.segmenter);
    let started = Instant::now();

    loop {
        std::thread::sleep(config.poll_interval);
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let message = match segmenter.process(&capture.take_buffer()) {
            SegmenterOutput::Segment(phrase) => Some(Captured::Phrase(phrase)),
            SegmenterOutput::NoSpeech => Some(Captured::Quiet),
            SegmenterOutput::Continue => None,
        };
        if let Some(message) = message
            && captured.send(message).is_err()
        {
            break;
        }

        if config.max_session.is_some_and(|max| started.elapsed() >= max) {
            tracing::debug!("recognition session reached its time limit");
            if let Some(phrase) = segmenter.flush() {
                let _ = captured.send(Captured::Phrase(phrase));
            }
            let _ = captured.send(Captured::Closed);
            break;
        }
    }

    capture.stop();
}

/// Transcribe phrases in capture order and report them
async fn transcribe_loop(
    transcriber: Arc<Transcriber>,
    mut captured: mpsc::UnboundedReceiver<Captured>,
    sink: RecognitionSink,
) {
    while let Some(message) = captured.recv().await {
        let delivered = match message {
            Captured::Phrase(samples) => {
                let wav = match samples_to_wav(&samples, SAMPLE_RATE) {
                    Ok(wav) => wav,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not encode phrase");
                        continue;
                    }
                };
                match transcriber.transcribe(&wav).await {
                    Ok(text) if text.is_empty() => sink.error(RecognitionErrorCode::NoSpeech),
                    Ok(text) => sink.result(text, true),
                    Err(e) => {
                        tracing::warn!(error = %e, "transcription failed");
                        sink.error(RecognitionErrorCode::Network);
                        return;
                    }
                }
            }
            Captured::Quiet => sink.error(RecognitionErrorCode::NoSpeech),
            Captured::Closed => {
                sink.end();
                return;
            }
        };
        if !delivered {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryKeyStore;
    use crate::recognition::{RecognitionEvent, SttBackend};

    fn transcriber() -> Transcriber {
        Transcriber::new(
            SttBackend::Whisper,
            "whisper-1".to_string(),
            Arc::new(MemoryKeyStore::new()),
        )
    }

    #[test]
    fn detect_without_key_is_unsupported() {
        let capability = CloudRecognizer::detect(CloudRecognizerConfig::default(), transcriber());
        match capability {
            RecognitionCapability::Unsupported { reason } => assert!(reason.contains("openai")),
            RecognitionCapability::Supported(_) => panic!("expected unsupported"),
        }
    }

    #[tokio::test]
    async fn quiet_and_close_map_to_recognition_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RecognitionSink::new(7, tx);
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();

        captured_tx.send(Captured::Quiet).unwrap();
        captured_tx.send(Captured::Closed).unwrap();
        transcribe_loop(Arc::new(transcriber()), captured_rx, sink).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.session, 7);
        assert_eq!(
            first.event,
            RecognitionEvent::Error(RecognitionErrorCode::NoSpeech)
        );
        assert_eq!(rx.recv().await.unwrap().event, RecognitionEvent::End);
    }

    #[tokio::test]
    async fn transcription_failure_reports_network_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RecognitionSink::new(1, tx);
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();

        // No API key configured, so the phrase cannot be transcribed
        captured_tx.send(Captured::Phrase(vec![0.1; 1600])).unwrap();
        captured_tx.send(Captured::Closed).unwrap();
        transcribe_loop(Arc::new(transcriber()), captured_rx, sink).await;

        assert_eq!(
            rx.recv().await.unwrap().event,
            RecognitionEvent::Error(RecognitionErrorCode::Network)
        );
        assert!(rx.try_recv().is_err());
    }
}
