//! Spoken output with a single active task
//!
//! At most one [`SpeechTask`] is queued, playing or paused at a time. A new
//! request supersedes the current one, except when it repeats the text that
//! is already on its way out.
//!
//! Synthesis and playback run on spawned tasks. Task ids double as the
//! "still current" check: a result that arrives for a task that is no longer
//! current is stopped and dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::Notice;
use crate::synthesis::{
    PlaybackControl, PlaybackDone, ProviderId, SynthesisProviderChain, Synthesized,
};
use crate::{Error, Result};

/// Identifies one speak request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a speech task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting for a provider to start playback
    Queued,
    /// Audio is playing
    Playing,
    /// Playback is paused
    Paused,
    /// Playback ran to the end
    Completed,
    /// No provider could speak the text
    Failed,
}

/// One request to speak a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechTask {
    /// Task identifier
    pub id: TaskId,
    /// Text being spoken
    pub text: String,
    /// Provider currently speaking, once known
    pub provider: Option<ProviderId>,
    /// Current status
    pub status: TaskStatus,
}

/// Why a task ended without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Playback reached the end
    Completed,
    /// Stopped on request
    Stopped,
    /// Replaced by a newer request
    Superseded,
}

/// Output of the speech engine
///
/// Every task produces exactly one terminal event, `Ended` or `Failed`.
#[derive(Debug)]
pub enum SpeechEvent {
    /// A task was accepted
    Queued {
        /// Task id
        task: TaskId,
    },
    /// Audio started; sent once per task
    Started {
        /// Task id
        task: TaskId,
        /// Provider speaking
        provider: ProviderId,
    },
    /// Playback paused
    Paused {
        /// Task id
        task: TaskId,
    },
    /// Playback resumed
    Resumed {
        /// Task id
        task: TaskId,
    },
    /// Task finished
    Ended {
        /// Task id
        task: TaskId,
        /// How it finished
        reason: EndReason,
    },
    /// Every provider failed
    Failed {
        /// Task id
        task: TaskId,
        /// Why
        error: Error,
    },
    /// User-facing notice
    Notice(Notice),
}

/// The task that currently owns the output
struct ActiveTask {
    task: SpeechTask,
    control: Option<Box<dyn PlaybackControl>>,
    worker: Option<AbortHandle>,
    tried: Vec<ProviderId>,
    notified: bool,
}

impl ActiveTask {
    /// Halt playback and cancel pending work
    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(mut control) = self.control.take() {
            control.stop();
        }
    }
}

#[derive(Default)]
struct OutputState {
    next_id: u64,
    active: Option<ActiveTask>,
    preferred: Option<ProviderId>,
}

impl OutputState {
    fn current(&mut self, id: TaskId) -> Option<&mut ActiveTask> {
        self.active.as_mut().filter(|a| a.task.id == id)
    }
}

/// Speaks text through the provider chain, one task at a time
///
/// Cheap to clone; clones share the same output.
#[derive(Clone)]
pub struct SpeechOutputEngine {
    chain: Arc<SynthesisProviderChain>,
    state: Arc<Mutex<OutputState>>,
    events: mpsc::UnboundedSender<SpeechEvent>,
}

impl SpeechOutputEngine {
    /// Create an engine and its event stream
    #[must_use]
    pub fn new(chain: Arc<SynthesisProviderChain>) -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Self {
            chain,
            state: Arc::new(Mutex::new(OutputState::default())),
            events,
        };
        (engine, rx)
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SpeechEvent) {
        // Receiver gone means nobody is listening for events anymore
        let _ = self.events.send(event);
    }

    /// Speak `text`, replacing whatever is currently speaking
    ///
    /// Returns `false` without side effects for blank text or when the same
    /// text is already queued or playing. Must be called within a tokio
    /// runtime.
    pub fn speak(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        let mut state = self.lock();
        if let Some(active) = &state.active
            && active.task.text == text
            && matches!(active.task.status, TaskStatus::Queued | TaskStatus::Playing)
        {
            tracing::debug!(task = %active.task.id, "duplicate speak request ignored");
            return false;
        }

        self.teardown(&mut state, EndReason::Superseded);

        state.next_id += 1;
        let id = TaskId(state.next_id);
        let preferred = state.preferred;
        state.active = Some(ActiveTask {
            task: SpeechTask {
                id,
                text: text.to_string(),
                provider: None,
                status: TaskStatus::Queued,
            },
            control: None,
            worker: None,
            tried: Vec::new(),
            notified: false,
        });
        self.emit(SpeechEvent::Queued { task: id });
        tracing::debug!(task = %id, chars = text.len(), "speech queued");

        let worker = self.spawn_synthesis(id, text.to_string(), preferred, Vec::new(), None);
        if let Some(active) = state.current(id) {
            active.worker = Some(worker);
        }
        true
    }

    /// Stop speaking and cancel pending synthesis; safe when idle
    pub fn stop(&self) {
        let mut state = self.lock();
        self.teardown(&mut state, EndReason::Stopped);
    }

    /// Pause or resume the active playback
    ///
    /// Returns `false` when nothing is playing or the provider refused.
    pub fn toggle_pause(&self) -> bool {
        let mut state = self.lock();
        let Some(active) = state.active.as_mut() else {
            return false;
        };
        let id = active.task.id;
        let Some(control) = active.control.as_mut() else {
            return false;
        };

        let (outcome, next, event) = match active.task.status {
            TaskStatus::Playing => (
                control.pause(),
                TaskStatus::Paused,
                SpeechEvent::Paused { task: id },
            ),
            TaskStatus::Paused => (
                control.resume(),
                TaskStatus::Playing,
                SpeechEvent::Resumed { task: id },
            ),
            _ => return false,
        };

        match outcome {
            Ok(()) => {
                active.task.status = next;
                self.emit(event);
                true
            }
            Err(e) => {
                tracing::warn!(task = %id, error = %e, "pause toggle failed");
                false
            }
        }
    }

    /// Prefer a provider for future requests; `None` restores the configured order
    pub fn set_preferred_provider(&self, provider: Option<ProviderId>) {
        self.lock().preferred = provider;
    }

    /// Provider preferred for future requests
    #[must_use]
    pub fn preferred_provider(&self) -> Option<ProviderId> {
        self.lock().preferred
    }

    /// Snapshot of the task that owns the output, if any
    #[must_use]
    pub fn current_task(&self) -> Option<SpeechTask> {
        self.lock().active.as_ref().map(|a| a.task.clone())
    }

    /// Whether audio is playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.status_is(TaskStatus::Playing)
    }

    /// Whether playback is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status_is(TaskStatus::Paused)
    }

    /// Whether a task is queued, playing or paused
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    fn status_is(&self, status: TaskStatus) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|a| a.task.status == status)
    }

    /// End the active task, if any, without touching the next one
    fn teardown(&self, state: &mut OutputState, reason: EndReason) {
        let Some(mut active) = state.active.take() else {
            return;
        };
        active.release();
        tracing::debug!(task = %active.task.id, ?reason, "speech ended");
        self.emit(SpeechEvent::Ended {
            task: active.task.id,
            reason,
        });
    }

    fn spawn_synthesis(
        &self,
        id: TaskId,
        text: String,
        preferred: Option<ProviderId>,
        exclude: Vec<ProviderId>,
        failed: Option<ProviderId>,
    ) -> AbortHandle {
        let engine = self.clone();
        tokio::spawn(async move {
            let attempted: Vec<ProviderId> = engine
                .chain
                .attempt_order(preferred)
                .into_iter()
                .filter(|p| !exclude.contains(p))
                .collect();
            let result = engine
                .chain
                .speak_excluding(&text, preferred, &exclude)
                .await;
            engine.install(id, result, &attempted, failed);
        })
        .abort_handle()
    }

    /// Take ownership of a synthesis result for task `id`
    fn install(
        &self,
        id: TaskId,
        result: Option<Synthesized>,
        attempted: &[ProviderId],
        failed: Option<ProviderId>,
    ) {
        let mut state = self.lock();
        let Some(active) = state.current(id) else {
            if let Some(stale) = result {
                tracing::debug!(task = %id, "discarding stale synthesis");
                stale.playback.stop();
            }
            return;
        };

        let Some(synthesized) = result else {
            active.task.status = TaskStatus::Failed;
            state.active = None;
            tracing::error!(task = %id, "speech failed on every provider");
            self.emit(SpeechEvent::Failed {
                task: id,
                error: Error::Synthesis("no synthesis provider could speak".to_string()),
            });
            return;
        };

        let provider = synthesized.provider;
        let upto = attempted
            .iter()
            .position(|p| *p == provider)
            .map_or(attempted.len(), |i| i + 1);
        for p in &attempted[..upto] {
            if !active.tried.contains(p) {
                active.tried.push(*p);
            }
        }

        let first_start = active.task.status == TaskStatus::Queued;
        active.task.provider = Some(provider);

        let (mut control, done) = synthesized.playback.into_parts();
        // A provider taking over a paused task stays paused
        let mut resumed = false;
        if active.task.status == TaskStatus::Paused {
            if let Err(e) = control.pause() {
                tracing::warn!(task = %id, provider = %provider, error = %e, "could not keep fallback paused");
                active.task.status = TaskStatus::Playing;
                resumed = true;
            }
        } else {
            active.task.status = TaskStatus::Playing;
        }
        active.control = Some(control);
        active.worker = Some(self.spawn_watcher(id, done));

        let notice = synthesized
            .fallback_from
            .or(failed)
            .filter(|_| !active.notified)
            .map(|from| Notice::ProviderFallback { from, to: provider });
        if notice.is_some() {
            active.notified = true;
        }

        // Emitted under the lock so the watcher cannot report an end first
        if first_start {
            tracing::info!(task = %id, provider = %provider, "speech started");
            self.emit(SpeechEvent::Started { task: id, provider });
        }
        if resumed {
            self.emit(SpeechEvent::Resumed { task: id });
        }
        if let Some(notice) = notice {
            self.emit(SpeechEvent::Notice(notice));
        }
        drop(state);
    }

    fn spawn_watcher(&self, id: TaskId, done: PlaybackDone) -> AbortHandle {
        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = done.wait().await;
            engine.finish(id, outcome);
        })
        .abort_handle()
    }

    /// Playback for task `id` finished
    fn finish(&self, id: TaskId, outcome: Result<()>) {
        let mut state = self.lock();
        let preferred = state.preferred;
        let Some(active) = state.current(id) else {
            return;
        };

        match outcome {
            Ok(()) => {
                active.task.status = TaskStatus::Completed;
                active.control = None;
                state.active = None;
                tracing::debug!(task = %id, "speech completed");
                self.emit(SpeechEvent::Ended {
                    task: id,
                    reason: EndReason::Completed,
                });
            }
            Err(e) => {
                let failed = active.task.provider;
                tracing::warn!(task = %id, provider = ?failed, error = %e, "playback failed, trying next provider");
                if let Some(mut control) = active.control.take() {
                    control.stop();
                }
                let text = active.task.text.clone();
                let exclude = active.tried.clone();
                let worker = self.spawn_synthesis(id, text, preferred, exclude, failed);
                active.worker = Some(worker);
            }
        }
    }
}

impl fmt::Debug for SpeechOutputEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechOutputEngine")
            .field("task", &self.current_task())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::synthesis::{PlaybackHandle, SynthesisProvider};

    struct Done;

    impl PlaybackControl for Done {
        fn pause(&mut self) -> Result<()> {
            Ok(())
        }
        fn resume(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    /// Finishes every playback immediately
    struct Quick;

    #[async_trait]
    impl SynthesisProvider for Quick {
        fn id(&self) -> ProviderId {
            ProviderId::Primary
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn speak(&self, _text: &str) -> Result<PlaybackHandle> {
            let (handle, completion) = PlaybackHandle::new(Done);
            completion.finish(Ok(()));
            Ok(handle)
        }
    }

    fn engine() -> (SpeechOutputEngine, mpsc::UnboundedReceiver<SpeechEvent>) {
        let chain = SynthesisProviderChain::new(vec![Arc::new(Quick) as Arc<dyn SynthesisProvider>]);
        SpeechOutputEngine::new(Arc::new(chain))
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let (engine, mut rx) = engine();
        assert!(!engine.speak("   "));
        assert!(!engine.is_active());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn completes_and_goes_idle() {
        let (engine, mut rx) = engine();
        assert!(engine.speak("hello"));

        assert!(matches!(rx.recv().await, Some(SpeechEvent::Queued { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(SpeechEvent::Started {
                provider: ProviderId::Primary,
                ..
            })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(SpeechEvent::Ended {
                reason: EndReason::Completed,
                ..
            })
        ));
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn stop_when_idle_emits_nothing() {
        let (engine, mut rx) = engine();
        engine.stop();
        engine.stop();
        assert!(rx.try_recv().is_err());
        assert!(!engine.toggle_pause());
    }

    #[tokio::test]
    async fn preferred_provider_is_remembered() {
        let (engine, _rx) = engine();
        engine.set_preferred_provider(Some(ProviderId::Secondary));
        assert_eq!(engine.preferred_provider(), Some(ProviderId::Secondary));
    }
}
