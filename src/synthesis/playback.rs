//! Audio decoding and speaker playback

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use super::{PlaybackCompletion, PlaybackControl, PlaybackHandle};
use crate::{Error, Result};

/// How often the playback thread checks for completion
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long the device may stop consuming samples before playback is failed
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Mono PCM ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Decode MP3 or WAV bytes, detected from the header
///
/// # Errors
///
/// Returns `Error::Audio` if the payload is empty or cannot be decoded
pub fn decode_audio(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(Error::Audio("empty audio payload".to_string()));
    }
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

/// Decode WAV bytes to mono f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("no audio frames decoded".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let count = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / count)
        .collect()
}

/// Somewhere decoded audio can be played
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start playing `audio`
    ///
    /// Resolves once output has started; the returned handle's completion
    /// fires when the audio finishes or fails.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no output device can play the audio
    async fn play(&self, audio: DecodedAudio) -> Result<PlaybackHandle>;
}

/// Plays audio on the default output device
///
/// cpal streams are not `Send`, so each playback owns a dedicated thread
/// that builds the stream and drops it when done.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSink;

impl CpalSink {
    /// Create a sink for the default output device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Whether the host has an output device
    #[must_use]
    pub fn has_output_device() -> bool {
        cpal::default_host().default_output_device().is_some()
    }
}

/// Shared between the control, the playback thread and the stream callback
#[derive(Debug, Default)]
struct Transport {
    paused: AtomicBool,
    stopped: AtomicBool,
    finished: AtomicBool,
    position: AtomicUsize,
    error: Mutex<Option<String>>,
}

/// Pause/stop control for a [`CpalSink`] playback
#[derive(Debug)]
struct CpalControl {
    transport: Arc<Transport>,
}

impl PlaybackControl for CpalControl {
    fn pause(&mut self) -> Result<()> {
        self.transport.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.transport.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.transport.stopped.store(true, Ordering::SeqCst);
    }
}

// A dropped control means nobody can stop the audio anymore
impl Drop for CpalControl {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        if audio.samples.is_empty() {
            return Err(Error::Audio("nothing to play".to_string()));
        }

        let transport = Arc::new(Transport::default());
        let (handle, completion) = PlaybackHandle::new(CpalControl {
            transport: Arc::clone(&transport),
        });
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("tts-playback".to_string())
            .spawn(move || run_playback(&audio, &transport, ready_tx, completion))?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("playback thread exited before starting".to_string()))??;
        Ok(handle)
    }
}

/// Find an output config that can play at `sample_rate`, preferring mono
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        })
        .ok_or_else(|| Error::Audio(format!("no output config for {sample_rate} Hz")))?;

    Ok(supported.with_sample_rate(rate).config())
}

/// Playback thread body
fn run_playback(
    audio: &DecodedAudio,
    transport: &Arc<Transport>,
    ready: oneshot::Sender<Result<()>>,
    completion: PlaybackCompletion,
) {
    let stream = match open_stream(audio, transport) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    tracing::debug!(
        samples = audio.samples.len(),
        sample_rate = audio.sample_rate,
        "playback started"
    );

    let mut last_position = 0;
    let mut last_progress = Instant::now();
    let outcome = loop {
        std::thread::sleep(POLL_INTERVAL);

        if transport.stopped.load(Ordering::SeqCst) {
            tracing::debug!("playback stopped");
            break Ok(());
        }
        if let Some(error) = transport.error.lock().ok().and_then(|mut e| e.take()) {
            break Err(Error::Audio(error));
        }
        if transport.finished.load(Ordering::SeqCst) {
            // Let the device drain its buffer
            std::thread::sleep(Duration::from_millis(100));
            tracing::debug!("playback complete");
            break Ok(());
        }

        let position = transport.position.load(Ordering::SeqCst);
        if position != last_position || transport.paused.load(Ordering::SeqCst) {
            last_position = position;
            last_progress = Instant::now();
        } else if last_progress.elapsed() > STALL_TIMEOUT {
            break Err(Error::Audio("output device stalled".to_string()));
        }
    };

    drop(stream);
    completion.finish(outcome);
}

fn open_stream(audio: &DecodedAudio, transport: &Arc<Transport>) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
    let config = output_config(&device, audio.sample_rate)?;
    let channels = usize::from(config.channels);

    let samples = Arc::new(audio.samples.clone());
    let data_transport = Arc::clone(transport);
    let error_transport = Arc::clone(transport);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let paused = data_transport.paused.load(Ordering::Relaxed)
                    || data_transport.stopped.load(Ordering::Relaxed);
                let mut pos = data_transport.position.load(Ordering::Relaxed);

                for frame in data.chunks_mut(channels) {
                    let sample = if paused {
                        0.0
                    } else if let Some(&s) = samples.get(pos) {
                        pos += 1;
                        s
                    } else {
                        data_transport.finished.store(true, Ordering::Relaxed);
                        0.0
                    };
                    frame.fill(sample);
                }

                data_transport.position.store(pos, Ordering::Relaxed);
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                if let Ok(mut slot) = error_transport.error.lock() {
                    slot.get_or_insert_with(|| err.to_string());
                }
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
