//! Energy-based speech segmentation
//!
//! Splits a microphone stream into phrases worth transcribing: a phrase
//! starts when RMS energy crosses the threshold and ends after a short run of
//! quiet samples. Long stretches with no speech at all are reported so the
//! capture engine can treat them as `no-speech`.

use std::time::Duration;

use super::microphone::SAMPLE_RATE;

/// Segmentation thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,
    /// Shortest phrase worth transcribing
    pub min_speech: Duration,
    /// Quiet run that closes a phrase
    pub trailing_silence: Duration,
    /// Quiet run with no phrase at all that reports no speech
    pub no_speech_timeout: Duration,
    /// Longest phrase before it is cut and sent anyway
    pub max_phrase: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech: Duration::from_millis(300),
            trailing_silence: Duration::from_millis(600),
            no_speech_timeout: Duration::from_secs(8),
            max_phrase: Duration::from_secs(30),
        }
    }
}

/// Result of feeding one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterOutput {
    /// Nothing to report yet
    Continue,
    /// A finished phrase
    Segment(Vec<f32>),
    /// Nobody has spoken for the no-speech timeout
    NoSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Speaking,
}

/// Turns a stream of samples into phrases
#[derive(Debug)]
pub struct UtteranceSegmenter {
    energy_threshold: f32,
    min_speech: usize,
    trailing_silence: usize,
    no_speech: usize,
    max_phrase: usize,
    state: State,
    speech: Vec<f32>,
    silence_counter: usize,
    idle_counter: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter for [`SAMPLE_RATE`] audio
    #[must_use]
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            min_speech: samples_for(config.min_speech),
            trailing_silence: samples_for(config.trailing_silence),
            no_speech: samples_for(config.no_speech_timeout),
            max_phrase: samples_for(config.max_phrase).max(1),
            state: State::Waiting,
            speech: Vec::new(),
            silence_counter: 0,
            idle_counter: 0,
        }
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> SegmenterOutput {
        if samples.is_empty() {
            return SegmenterOutput::Continue;
        }
        let energy = calculate_energy(samples);
        let is_speech = energy > self.energy_threshold;

        match self.state {
            State::Waiting => {
                if is_speech {
                    self.state = State::Speaking;
                    self.speech.clear();
                    self.speech.extend_from_slice(samples);
                    self.silence_counter = 0;
                    self.idle_counter = 0;
                    tracing::trace!(energy, "speech detected");
                } else {
                    self.idle_counter += samples.len();
                    if self.idle_counter >= self.no_speech {
                        self.idle_counter = 0;
                        return SegmenterOutput::NoSpeech;
                    }
                }
            }
            State::Speaking => {
                self.speech.extend_from_slice(samples);
                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter >= self.trailing_silence {
                    let voiced = self.speech.len().saturating_sub(self.silence_counter);
                    let phrase = std::mem::take(&mut self.speech);
                    self.reset();
                    if voiced >= self.min_speech {
                        tracing::debug!(samples = phrase.len(), "speech segment complete");
                        return SegmenterOutput::Segment(phrase);
                    }
                    tracing::trace!(voiced, "discarding short noise burst");
                } else if self.speech.len() >= self.max_phrase {
                    // Steady noise above the threshold never goes quiet
                    let phrase = std::mem::take(&mut self.speech);
                    self.reset();
                    tracing::debug!(samples = phrase.len(), "phrase hit length cap");
                    return SegmenterOutput::Segment(phrase);
                }
            }
        }

        SegmenterOutput::Continue
    }

    /// Take a phrase still in progress, if it is long enough to transcribe
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let voiced = self.speech.len().saturating_sub(self.silence_counter);
        let phrase = std::mem::take(&mut self.speech);
        let long_enough = self.state == State::Speaking && voiced >= self.min_speech;
        self.reset();
        long_enough.then_some(phrase)
    }

    /// Whether a phrase is in progress
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == State::Speaking
    }

    fn reset(&mut self) {
        self.state = State::Waiting;
        self.speech.clear();
        self.silence_counter = 0;
        self.idle_counter = 0;
    }
}

fn samples_for(duration: Duration) -> usize {
    let samples = duration.as_millis() * u128::from(SAMPLE_RATE) / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX)
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
