//! Speech synthesis providers
//!
//! A provider turns text into a running playback. The chain in
//! [`SynthesisProviderChain`] tries providers in priority order; the output
//! engine owns whatever playback comes back.

mod chain;
mod local;
mod playback;
mod remote;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::{Error, Result};

pub use chain::{SynthesisProviderChain, Synthesized};
pub use local::{LocalTtsConfig, LocalTtsProvider, LocalVoice, pick_voice};
pub use playback::{AudioSink, CpalSink, DecodedAudio, decode_audio};
pub use remote::{RemoteBackend, RemoteTtsConfig, RemoteTtsProvider};

/// Position of a provider in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Remote neural voice
    Primary,
    /// Local voice
    Secondary,
}

impl ProviderId {
    /// Default chain order
    pub const DEFAULT_ORDER: [Self; 2] = [Self::Primary, Self::Secondary];

    /// Stable name used in config and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "remote" => Ok(Self::Primary),
            "secondary" | "local" => Ok(Self::Secondary),
            other => Err(Error::Config(format!("unknown synthesis provider: {other}"))),
        }
    }
}

/// Transport control over a running playback
pub trait PlaybackControl: Send {
    /// Pause output
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot pause
    fn pause(&mut self) -> Result<()>;

    /// Resume paused output
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot resume
    fn resume(&mut self) -> Result<()>;

    /// Halt output and release the audio resource; safe to call repeatedly
    fn stop(&mut self);
}

/// Signals how a playback finished
#[derive(Debug)]
pub struct PlaybackCompletion(oneshot::Sender<Result<()>>);

impl PlaybackCompletion {
    /// Report the playback outcome
    pub fn finish(self, outcome: Result<()>) {
        // Nobody waiting means the task was already torn down
        let _ = self.0.send(outcome);
    }
}

/// Resolves when a playback finishes
#[derive(Debug)]
pub struct PlaybackDone(oneshot::Receiver<Result<()>>);

impl PlaybackDone {
    /// Wait for the playback outcome
    ///
    /// # Errors
    ///
    /// Returns the playback error, or `Error::Audio` if the provider dropped
    /// the completion without reporting
    pub async fn wait(self) -> Result<()> {
        self.0
            .await
            .unwrap_or_else(|_| Err(Error::Audio("playback ended without completion".to_string())))
    }
}

/// A playback that a provider started
pub struct PlaybackHandle {
    control: Box<dyn PlaybackControl>,
    done: PlaybackDone,
}

impl PlaybackHandle {
    /// Wrap a control; the provider keeps the completion and finishes it
    #[must_use]
    pub fn new(control: impl PlaybackControl + 'static) -> (Self, PlaybackCompletion) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            control: Box::new(control),
            done: PlaybackDone(rx),
        };
        (handle, PlaybackCompletion(tx))
    }

    /// Split into control and completion
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn PlaybackControl>, PlaybackDone) {
        (self.control, self.done)
    }

    /// Stop playback and drop the handle
    pub fn stop(mut self) {
        self.control.stop();
    }
}

impl fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackHandle").finish_non_exhaustive()
    }
}

/// A text-to-speech engine
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Chain position this provider fills
    fn id(&self) -> ProviderId;

    /// Whether the provider can be attempted (credential present, engine installed)
    ///
    /// Must not perform network I/O.
    fn is_available(&self) -> bool;

    /// Synthesize `text` and start playing it
    ///
    /// # Errors
    ///
    /// Returns `Error::Provider` on network, decode or playback failure
    async fn speak(&self, text: &str) -> Result<PlaybackHandle>;
}
