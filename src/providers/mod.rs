//! Provider credential storage
//!
//! Synthesis and transcription providers receive a [`CredentialStore`] at
//! construction instead of reading keys from ambient state.

mod local_store;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};

use crate::config::ApiKeys;
use crate::{Error, Result};

pub use local_store::LocalKeyStore;

/// Provider names used as credential keys
pub mod names {
    pub const ELEVENLABS: &str = "elevenlabs";
    pub const OPENAI: &str = "openai";
    pub const GOOGLE: &str = "google";
    pub const DEEPGRAM: &str = "deepgram";

    /// Every provider that takes a key
    pub const ALL: [&str; 4] = [ELEVENLABS, OPENAI, GOOGLE, DEEPGRAM];
}

/// Key-value store for provider API keys
pub trait CredentialStore: Send + Sync {
    /// Key for `provider`, or `None` if not configured
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read
    fn get(&self, provider: &str) -> Result<Option<SecretString>>;

    /// Store or replace the key for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be written
    fn set(&self, provider: &str, api_key: &str) -> Result<()>;

    /// Remove the key for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be written
    fn remove(&self, provider: &str) -> Result<()>;

    /// Providers that have a key
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read
    fn list_configured(&self) -> Result<Vec<String>>;

    /// Whether `provider` has a key; read failures count as missing
    fn contains(&self, provider: &str) -> bool {
        self.get(provider).ok().flatten().is_some()
    }
}

/// In-process key store
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, SecretString>>,
}

impl MemoryKeyStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded from configured API keys
    #[must_use]
    pub fn from_api_keys(keys: &ApiKeys) -> Self {
        let store = Self::new();
        let entries = [
            (names::ELEVENLABS, &keys.elevenlabs),
            (names::OPENAI, &keys.openai),
            (names::GOOGLE, &keys.google),
            (names::DEEPGRAM, &keys.deepgram),
        ];
        if let Ok(mut map) = store.keys.write() {
            for (name, key) in entries {
                if let Some(key) = key.as_ref().filter(|k| !k.is_empty()) {
                    map.insert(name.to_string(), SecretString::from(key.clone()));
                }
            }
        }
        store
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Database("credential store lock poisoned".to_string())
}

impl CredentialStore for MemoryKeyStore {
    fn get(&self, provider: &str) -> Result<Option<SecretString>> {
        Ok(self
            .keys
            .read()
            .map_err(poisoned)?
            .get(provider)
            .map(|key| SecretString::from(key.expose_secret().to_string())))
    }

    fn set(&self, provider: &str, api_key: &str) -> Result<()> {
        self.keys
            .write()
            .map_err(poisoned)?
            .insert(provider.to_string(), SecretString::from(api_key.to_string()));
        Ok(())
    }

    fn remove(&self, provider: &str) -> Result<()> {
        self.keys.write().map_err(poisoned)?.remove(provider);
        Ok(())
    }

    fn list_configured(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.keys.read().map_err(poisoned)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Resolves keys from several stores, first match wins
///
/// Writes go to the first store.
pub struct LayeredKeyStore {
    layers: Vec<Arc<dyn CredentialStore>>,
}

impl LayeredKeyStore {
    /// Create a layered store; earlier layers take precedence
    #[must_use]
    pub fn new(layers: Vec<Arc<dyn CredentialStore>>) -> Self {
        Self { layers }
    }

    fn primary(&self) -> Result<&Arc<dyn CredentialStore>> {
        self.layers
            .first()
            .ok_or_else(|| Error::Config("no credential store configured".to_string()))
    }
}

impl CredentialStore for LayeredKeyStore {
    fn get(&self, provider: &str) -> Result<Option<SecretString>> {
        for layer in &self.layers {
            match layer.get(provider) {
                Ok(Some(key)) => return Ok(Some(key)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(provider, error = %e, "credential layer read failed");
                }
            }
        }
        Ok(None)
    }

    fn set(&self, provider: &str, api_key: &str) -> Result<()> {
        self.primary()?.set(provider, api_key)
    }

    fn remove(&self, provider: &str) -> Result<()> {
        self.primary()?.remove(provider)
    }

    fn list_configured(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for layer in &self.layers {
            for name in layer.list_configured()? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
