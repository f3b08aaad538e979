//! Microphone input
//!
//! Speech APIs want 16 kHz mono, so the device is asked for exactly that and
//! no resampling happens here.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Capture sample rate
pub const SAMPLE_RATE: u32 = 16000;

/// Samples kept when nobody drains the buffer (30 s)
const MAX_BUFFERED: usize = SAMPLE_RATE as usize * 30;

/// Records the default input device into a shared buffer
///
/// Not `Send`: cpal streams must stay on the thread that built them.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Whether the host has an input device at all
    #[must_use]
    pub fn has_input_device() -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    /// Bind the default input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` if there is no input device or it cannot
    /// record 16 kHz mono
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Unsupported("no input device available".to_string()))?;
        let config = speech_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "microphone bound"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Begin recording; a no-op while already recording
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if the device refuses access, or
    /// `Error::Audio` for other stream failures
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                        let overflow = buf.len().saturating_sub(MAX_BUFFERED);
                        if overflow > 0 {
                            buf.drain(..overflow);
                        }
                    }
                },
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(stream_error)?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("microphone recording");
        Ok(())
    }

    /// Stop recording and release the device
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("microphone released");
        }
    }

    /// Samples recorded since the last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Whether a stream is open
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn speech_config(device: &Device) -> Result<StreamConfig> {
    let rate = SampleRate(SAMPLE_RATE);
    device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| c.channels() == 1 && (c.min_sample_rate()..=c.max_sample_rate()).contains(&rate))
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| Error::Unsupported("microphone cannot record 16 kHz mono".to_string()))
}

fn stream_error(e: BuildStreamError) -> Error {
    match e {
        BuildStreamError::DeviceNotAvailable => {
            Error::Permission("microphone not available".to_string())
        }
        other => Error::Audio(other.to_string()),
    }
}

/// Scale a float sample to 16-bit PCM, clamping out-of-range input
#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Encode mono samples as a 16-bit WAV file for transcription APIs
///
/// # Errors
///
/// Returns `Error::Audio` if encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| Error::Audio(e.to_string());

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample)).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    Ok(cursor.into_inner())
}
