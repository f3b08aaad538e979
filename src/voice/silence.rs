//! Reset-on-activity silence window
//!
//! A single-shot countdown that reports "utterance complete" when no new
//! recognized text arrives in time. Arming always cancels the previous
//! window. Each arm gets a generation number so an expiry that was already
//! queued when a newer arm happened is rejected by [`SilenceDetector::claim`].
//!
//! Time comes from the tokio clock, so tests can pause and advance it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default silence window
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Expiry notification for one arm cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceExpiry {
    generation: u64,
    fired_at: Instant,
}

impl SilenceExpiry {
    /// When the window ran out
    #[must_use]
    pub const fn fired_at(&self) -> Instant {
        self.fired_at
    }
}

/// Restartable single-shot countdown
#[derive(Debug)]
pub struct SilenceDetector {
    timeout: Duration,
    generation: u64,
    armed_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    expiry_tx: mpsc::UnboundedSender<SilenceExpiry>,
}

impl SilenceDetector {
    /// Create a detector and the receiver its expiries are delivered on
    #[must_use]
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<SilenceExpiry>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let detector = Self {
            timeout,
            generation: 0,
            armed_at: None,
            timer: None,
            expiry_tx,
        };
        (detector, expiry_rx)
    }

    /// Configured window length
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm for the configured timeout, cancelling any armed window
    pub fn arm(&mut self) {
        self.arm_for(self.timeout);
    }

    /// Arm for an explicit timeout, cancelling any armed window
    pub fn arm_for(&mut self, timeout: Duration) {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        self.armed_at = Some(Instant::now());

        let generation = self.generation;
        let tx = self.expiry_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Receiver gone means the owning engine was dropped
            let _ = tx.send(SilenceExpiry {
                generation,
                fired_at: Instant::now(),
            });
        }));

        tracing::trace!(generation, timeout_ms = timeout.as_millis(), "silence window armed");
    }

    /// Cancel the armed window; safe when nothing is armed
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.armed_at.take().is_some() {
            tracing::trace!(generation = self.generation, "silence window cancelled");
        }
    }

    /// Accept an expiry if it belongs to the currently armed window
    ///
    /// Returns `true` at most once per arm cycle. Expiries from cancelled or
    /// superseded windows return `false`.
    pub fn claim(&mut self, expiry: SilenceExpiry) -> bool {
        if self.armed_at.is_none() || expiry.generation != self.generation {
            tracing::trace!(
                stale = expiry.generation,
                current = self.generation,
                "ignoring stale silence expiry"
            );
            return false;
        }
        self.armed_at = None;
        self.timer = None;
        true
    }

    /// Whether a window is armed
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// When the current window was armed
    #[must_use]
    pub const fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }
}

impl Drop for SilenceDetector {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
