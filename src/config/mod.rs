//! Configuration management for the voice pipeline
//!
//! Every setting resolves env > TOML file > default. The resolved
//! configuration is read-only.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::recognition::{CloudRecognizerConfig, SttBackend};
use crate::synthesis::{LocalTtsConfig, ProviderId, RemoteBackend, RemoteTtsConfig};
use crate::voice::CaptureConfig;
use crate::{Error, Result};

use file::VoiceConfigFile;

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening behavior
    pub capture: CaptureConfig,

    /// Speech-to-text settings
    pub recognition: RecognitionConfig,

    /// Text-to-speech settings
    pub synthesis: SynthesisConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Path to data directory (credential database)
    pub data_dir: PathBuf,
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Transcription API
    pub backend: SttBackend,
    /// Transcription model
    pub model: String,
    /// Close a listening session after this long
    pub max_session: Option<Duration>,
}

impl RecognitionConfig {
    /// Settings for the cloud recognizer
    #[must_use]
    pub fn recognizer(&self) -> CloudRecognizerConfig {
        CloudRecognizerConfig {
            max_session: self.max_session,
            ..CloudRecognizerConfig::default()
        }
    }
}

/// Text-to-speech settings
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Provider priority
    pub order: Vec<ProviderId>,
    /// Provider to try first when available
    pub preferred: Option<ProviderId>,
    /// Remote provider settings
    pub remote: RemoteTtsConfig,
    /// Local provider settings
    pub local: LocalTtsConfig,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `ElevenLabs` API key
    pub elevenlabs: Option<String>,
    /// `OpenAI` API key (TTS and Whisper)
    pub openai: Option<String>,
    /// Google Cloud Text-to-Speech API key
    pub google: Option<String>,
    /// Deepgram API key
    pub deepgram: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ApiKeys")
            .field("elevenlabs", &redact(&self.elevenlabs))
            .field("openai", &redact(&self.openai))
            .field("google", &redact(&self.google))
            .field("deepgram", &redact(&self.deepgram))
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a provider or backend name is not recognized
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a provider or backend name is not recognized
    pub fn from_sources(fc: VoiceConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        // Capture (env > toml > default)
        let default_capture = CaptureConfig::default();
        let capture = CaptureConfig {
            silence_timeout: env("BEACON_VOICE_SILENCE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .or(fc.capture.silence_timeout_ms)
                .map_or(default_capture.silence_timeout, Duration::from_millis),
            auto_send: flag("BEACON_VOICE_AUTO_SEND")
                .or(fc.capture.auto_send)
                .unwrap_or(default_capture.auto_send),
            continuous: flag("BEACON_VOICE_CONTINUOUS")
                .or(fc.capture.continuous)
                .unwrap_or(default_capture.continuous),
            no_speech_completes: flag("BEACON_VOICE_NO_SPEECH_COMPLETES")
                .or(fc.capture.no_speech_completes)
                .unwrap_or(default_capture.no_speech_completes),
        };

        // Recognition
        let stt_backend = env("BEACON_VOICE_STT_BACKEND")
            .or(fc.recognition.backend)
            .map(|s| s.parse::<SttBackend>())
            .transpose()?
            .unwrap_or(SttBackend::Whisper);
        let recognition = RecognitionConfig {
            backend: stt_backend,
            model: env("BEACON_VOICE_STT_MODEL")
                .or(fc.recognition.model)
                .unwrap_or_else(|| stt_backend.default_model().to_string()),
            max_session: env("BEACON_VOICE_MAX_SESSION_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.recognition.max_session_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        // Synthesis
        let order = match env("BEACON_VOICE_PROVIDER_ORDER") {
            Some(list) => parse_order(list.split(','))?,
            None => match fc.synthesis.order {
                Some(list) => parse_order(list.iter().map(String::as_str))?,
                None => ProviderId::DEFAULT_ORDER.to_vec(),
            },
        };
        let preferred = env("BEACON_VOICE_PREFERRED_PROVIDER")
            .or(fc.synthesis.preferred)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<ProviderId>())
            .transpose()?;

        let remote_fc = fc.synthesis.remote;
        let remote_backend = env("BEACON_VOICE_REMOTE_BACKEND")
            .or(remote_fc.backend)
            .map(|s| s.parse::<RemoteBackend>())
            .transpose()?
            .unwrap_or(RemoteBackend::ElevenLabs);
        let remote_default = RemoteTtsConfig::for_backend(remote_backend);
        let remote = RemoteTtsConfig {
            voice_id: env("BEACON_VOICE_REMOTE_VOICE")
                .or(remote_fc.voice)
                .unwrap_or(remote_default.voice_id),
            model_id: env("BEACON_VOICE_REMOTE_MODEL")
                .or(remote_fc.model)
                .unwrap_or(remote_default.model_id),
            speed: remote_fc.speed.unwrap_or(remote_default.speed),
            base_url: remote_fc.base_url,
            ..remote_default
        };

        let local_fc = fc.synthesis.local;
        let local_default = LocalTtsConfig::default();
        let local = LocalTtsConfig {
            binary: env("BEACON_VOICE_LOCAL_BINARY")
                .or(local_fc.binary)
                .unwrap_or(local_default.binary),
            voice_hint: env("BEACON_VOICE_LOCAL_VOICE")
                .or(local_fc.voice)
                .unwrap_or(local_default.voice_hint),
            rate: env("BEACON_VOICE_LOCAL_RATE")
                .and_then(|s| s.parse().ok())
                .or(local_fc.rate)
                .unwrap_or(local_default.rate),
            pitch: env("BEACON_VOICE_LOCAL_PITCH")
                .and_then(|s| s.parse().ok())
                .or(local_fc.pitch)
                .unwrap_or(local_default.pitch),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            google: env("GOOGLE_TTS_API_KEY").or(fc.api_keys.google),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
        };

        // Data directory (~/.local/share/omni/beacon-voice on Linux)
        let data_dir = env("BEACON_VOICE_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            capture,
            recognition,
            synthesis: SynthesisConfig {
                order,
                preferred,
                remote,
                local,
            },
            api_keys,
            data_dir,
        })
    }

    /// Path to the credential database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("voice.db")
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("."),
        |d| d.data_dir().join("omni").join("beacon-voice"),
    )
}

fn parse_order<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<ProviderId>> {
    let order: Vec<ProviderId> = names
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect::<Result<_>>()?;
    if order.is_empty() {
        return Err(Error::Config("provider order is empty".to_string()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn file(toml_src: &str) -> VoiceConfigFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(VoiceConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.capture, CaptureConfig::default());
        assert_eq!(config.synthesis.order, ProviderId::DEFAULT_ORDER.to_vec());
        assert!(config.synthesis.preferred.is_none());
        assert_eq!(config.recognition.backend, SttBackend::Whisper);
        assert_eq!(config.recognition.model, "whisper-1");
        assert!(config.recognition.max_session.is_none());
        assert_eq!(config.synthesis.local.binary, "espeak-ng");
    }

    #[test]
    fn env_overrides_file() {
        let fc = file(
            r"
            [capture]
            silence_timeout_ms = 1500
            auto_send = false
            ",
        );
        let env = env_from(&[("BEACON_VOICE_SILENCE_TIMEOUT_MS", "900")]);
        let config = Config::from_sources(fc, env).unwrap();
        assert_eq!(config.capture.silence_timeout, Duration::from_millis(900));
        assert!(!config.capture.auto_send);
    }

    #[test]
    fn unparsable_env_number_falls_through() {
        let fc = file("[capture]\nsilence_timeout_ms = 1500");
        let env = env_from(&[("BEACON_VOICE_SILENCE_TIMEOUT_MS", "soon")]);
        let config = Config::from_sources(fc, env).unwrap();
        assert_eq!(config.capture.silence_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn provider_order_and_preference() {
        let env = env_from(&[
            ("BEACON_VOICE_PROVIDER_ORDER", "local, remote"),
            ("BEACON_VOICE_PREFERRED_PROVIDER", "primary"),
        ]);
        let config = Config::from_sources(VoiceConfigFile::default(), env).unwrap();
        assert_eq!(
            config.synthesis.order,
            vec![ProviderId::Secondary, ProviderId::Primary]
        );
        assert_eq!(config.synthesis.preferred, Some(ProviderId::Primary));
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let env = env_from(&[("BEACON_VOICE_PROVIDER_ORDER", "primary,cloud9")]);
        let err = Config::from_sources(VoiceConfigFile::default(), env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn remote_backend_defaults_follow_backend() {
        let fc = file("[synthesis.remote]\nbackend = \"openai\"");
        let config = Config::from_sources(fc, env_from(&[])).unwrap();
        assert_eq!(config.synthesis.remote.backend, RemoteBackend::OpenAi);
        assert_eq!(config.synthesis.remote.voice_id, "alloy");
    }

    #[test]
    fn api_keys_are_redacted_in_debug() {
        let env = env_from(&[("ELEVENLABS_API_KEY", "xi-secret")]);
        let config = Config::from_sources(VoiceConfigFile::default(), env).unwrap();
        assert_eq!(config.api_keys.elevenlabs.as_deref(), Some("xi-secret"));
        assert!(!format!("{:?}", config.api_keys).contains("xi-secret"));
    }

    #[test]
    fn data_dir_override() {
        let env = env_from(&[("BEACON_VOICE_DATA_DIR", "/tmp/voice-data")]);
        let config = Config::from_sources(VoiceConfigFile::default(), env).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/voice-data/voice.db"));
    }
}
