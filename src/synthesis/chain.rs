//! Ordered provider fallback

use std::sync::Arc;

use super::{PlaybackHandle, ProviderId, SynthesisProvider};

/// A successful synthesis
#[derive(Debug)]
pub struct Synthesized {
    /// Provider that is now playing
    pub provider: ProviderId,
    /// The running playback
    pub playback: PlaybackHandle,
    /// First provider that was attempted and failed, if any
    pub fallback_from: Option<ProviderId>,
}

/// Tries providers in priority order until one speaks
///
/// Attempts are sequential: the next provider is only tried after the
/// previous one failed, so a paid API is never invoked twice for one request.
pub struct SynthesisProviderChain {
    providers: Vec<Arc<dyn SynthesisProvider>>,
    order: Vec<ProviderId>,
}

impl SynthesisProviderChain {
    /// Create a chain with the default order
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn SynthesisProvider>>) -> Self {
        Self::with_order(providers, ProviderId::DEFAULT_ORDER.to_vec())
    }

    /// Create a chain with an explicit order
    ///
    /// Ids without a registered provider are skipped at speak time.
    #[must_use]
    pub fn with_order(providers: Vec<Arc<dyn SynthesisProvider>>, order: Vec<ProviderId>) -> Self {
        let mut deduped = Vec::with_capacity(order.len());
        for id in order {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        Self {
            providers,
            order: deduped,
        }
    }

    /// Configured order
    #[must_use]
    pub fn order(&self) -> &[ProviderId] {
        &self.order
    }

    /// Look up a provider by id
    #[must_use]
    pub fn provider(&self, id: ProviderId) -> Option<&Arc<dyn SynthesisProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Whether a provider is registered and available
    #[must_use]
    pub fn is_available(&self, id: ProviderId) -> bool {
        self.provider(id).is_some_and(|p| p.is_available())
    }

    /// Order to try for a request, preferred provider first when usable
    #[must_use]
    pub fn attempt_order(&self, preferred: Option<ProviderId>) -> Vec<ProviderId> {
        let preferred = preferred.filter(|id| self.is_available(*id));
        let mut order: Vec<ProviderId> = preferred.into_iter().collect();
        order.extend(self.order.iter().copied().filter(|id| Some(*id) != preferred));
        order
    }

    /// Speak `text` with the first provider that succeeds
    ///
    /// Returns `None` when every provider is unavailable or failed.
    pub async fn speak(&self, text: &str, preferred: Option<ProviderId>) -> Option<Synthesized> {
        self.speak_excluding(text, preferred, &[]).await
    }

    /// Speak `text`, skipping providers in `exclude`
    ///
    /// Used to continue down the chain after a provider failed mid-playback.
    pub async fn speak_excluding(
        &self,
        text: &str,
        preferred: Option<ProviderId>,
        exclude: &[ProviderId],
    ) -> Option<Synthesized> {
        let mut fallback_from = None;

        for id in self.attempt_order(preferred) {
            if exclude.contains(&id) {
                continue;
            }
            let Some(provider) = self.provider(id) else {
                continue;
            };
            if !provider.is_available() {
                tracing::debug!(provider = %id, "synthesis provider unavailable, skipping");
                continue;
            }

            match provider.speak(text).await {
                Ok(playback) => {
                    if let Some(from) = fallback_from {
                        tracing::warn!(from = %from, to = %id, "fell back to next synthesis provider");
                    } else {
                        tracing::debug!(provider = %id, "synthesis started");
                    }
                    return Some(Synthesized {
                        provider: id,
                        playback,
                        fallback_from,
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = %id, error = %e, "synthesis provider failed");
                    fallback_from.get_or_insert(id);
                }
            }
        }

        tracing::error!(chars = text.len(), "no synthesis provider could speak");
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::synthesis::PlaybackControl;
    use crate::{Error, Result};

    struct Silent;

    impl PlaybackControl for Silent {
        fn pause(&mut self) -> Result<()> {
            Ok(())
        }
        fn resume(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    struct Scripted {
        id: ProviderId,
        available: bool,
        fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(id: ProviderId, available: bool, fails: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                available,
                fails,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SynthesisProvider for Scripted {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn speak(&self, text: &str) -> Result<PlaybackHandle> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fails {
                return Err(Error::Provider("network unreachable".to_string()));
            }
            let (handle, completion) = PlaybackHandle::new(Silent);
            completion.finish(Ok(()));
            Ok(handle)
        }
    }

    fn chain(primary: &Arc<Scripted>, secondary: &Arc<Scripted>) -> SynthesisProviderChain {
        SynthesisProviderChain::new(vec![
            Arc::clone(primary) as Arc<dyn SynthesisProvider>,
            Arc::clone(secondary) as Arc<dyn SynthesisProvider>,
        ])
    }

    #[tokio::test]
    async fn primary_wins_when_healthy() {
        let primary = Scripted::new(ProviderId::Primary, true, false);
        let secondary = Scripted::new(ProviderId::Secondary, true, false);
        let result = chain(&primary, &secondary).speak("hi", None).await.unwrap();

        assert_eq!(result.provider, ProviderId::Primary);
        assert!(result.fallback_from.is_none());
        assert!(secondary.calls().is_empty());
    }

    #[tokio::test]
    async fn falls_back_once_on_failure() {
        let primary = Scripted::new(ProviderId::Primary, true, true);
        let secondary = Scripted::new(ProviderId::Secondary, true, false);
        let result = chain(&primary, &secondary)
            .speak("Hi there", None)
            .await
            .unwrap();

        assert_eq!(result.provider, ProviderId::Secondary);
        assert_eq!(result.fallback_from, Some(ProviderId::Primary));
        assert_eq!(secondary.calls(), vec!["Hi there".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_provider_is_never_called() {
        let primary = Scripted::new(ProviderId::Primary, false, false);
        let secondary = Scripted::new(ProviderId::Secondary, true, false);
        let result = chain(&primary, &secondary).speak("hi", None).await.unwrap();

        assert!(primary.calls().is_empty());
        assert_eq!(result.provider, ProviderId::Secondary);
        assert!(result.fallback_from.is_none());
    }

    #[tokio::test]
    async fn all_failing_returns_none() {
        let primary = Scripted::new(ProviderId::Primary, true, true);
        let secondary = Scripted::new(ProviderId::Secondary, true, true);
        assert!(chain(&primary, &secondary).speak("hi", None).await.is_none());
        assert_eq!(primary.calls().len(), 1);
        assert_eq!(secondary.calls().len(), 1);
    }

    #[tokio::test]
    async fn preferred_provider_goes_first() {
        let primary = Scripted::new(ProviderId::Primary, true, false);
        let secondary = Scripted::new(ProviderId::Secondary, true, false);
        let chain = chain(&primary, &secondary);

        assert_eq!(
            chain.attempt_order(Some(ProviderId::Secondary)),
            vec![ProviderId::Secondary, ProviderId::Primary]
        );
        let result = chain.speak("hi", Some(ProviderId::Secondary)).await.unwrap();
        assert_eq!(result.provider, ProviderId::Secondary);
        assert!(primary.calls().is_empty());
    }

    #[tokio::test]
    async fn unavailable_preference_is_ignored() {
        let primary = Scripted::new(ProviderId::Primary, true, false);
        let secondary = Scripted::new(ProviderId::Secondary, false, false);
        let chain = chain(&primary, &secondary);
        assert_eq!(
            chain.attempt_order(Some(ProviderId::Secondary)),
            vec![ProviderId::Primary, ProviderId::Secondary]
        );
    }

    #[tokio::test]
    async fn excluded_providers_are_skipped() {
        let primary = Scripted::new(ProviderId::Primary, true, false);
        let secondary = Scripted::new(ProviderId::Secondary, true, false);
        let result = chain(&primary, &secondary)
            .speak_excluding("hi", None, &[ProviderId::Primary])
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderId::Secondary);
        assert!(primary.calls().is_empty());
    }
}
