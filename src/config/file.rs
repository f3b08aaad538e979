//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Listening behavior
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech-to-text settings
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Text-to-speech settings
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Data directory override
    pub data_dir: Option<String>,
}

/// Listening behavior
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Quiet period that ends an utterance, in milliseconds
    pub silence_timeout_ms: Option<u64>,
    /// Deliver utterances automatically
    pub auto_send: Option<bool>,
    /// Keep listening after each utterance
    pub continuous: Option<bool>,
    /// Treat `no-speech` with accumulated text as end of utterance
    pub no_speech_completes: Option<bool>,
}

/// Speech-to-text settings
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// "whisper" or "deepgram"
    pub backend: Option<String>,
    /// Model identifier (e.g. "whisper-1")
    pub model: Option<String>,
    /// Close a listening session after this many seconds
    pub max_session_secs: Option<u64>,
}

/// Text-to-speech settings
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// Provider order, e.g. `["primary", "secondary"]`
    pub order: Option<Vec<String>>,
    /// Provider to try first
    pub preferred: Option<String>,
    /// Remote provider settings
    #[serde(default)]
    pub remote: RemoteFileConfig,
    /// Local provider settings
    #[serde(default)]
    pub local: LocalFileConfig,
}

/// Remote TTS settings
#[derive(Debug, Default, Deserialize)]
pub struct RemoteFileConfig {
    /// "elevenlabs", "openai" or "google"
    pub backend: Option<String>,
    /// Voice identifier
    pub voice: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Speaking rate multiplier
    pub speed: Option<f32>,
    /// API base URL override
    pub base_url: Option<String>,
}

/// Local TTS settings
#[derive(Debug, Default, Deserialize)]
pub struct LocalFileConfig {
    /// Engine binary
    pub binary: Option<String>,
    /// Voice name or language tag
    pub voice: Option<String>,
    /// Speaking rate multiplier
    pub rate: Option<f32>,
    /// Pitch multiplier
    pub pitch: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub elevenlabs: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: VoiceConfigFile = toml::from_str(
            r#"
            [capture]
            silence_timeout_ms = 1500

            [synthesis]
            order = ["secondary", "primary"]

            [synthesis.remote]
            backend = "openai"
            voice = "nova"
            "#,
        )
        .unwrap();

        assert_eq!(fc.capture.silence_timeout_ms, Some(1500));
        assert!(fc.capture.auto_send.is_none());
        assert_eq!(fc.synthesis.order.as_deref().map(<[String]>::len), Some(2));
        assert_eq!(fc.synthesis.remote.voice.as_deref(), Some("nova"));
        assert!(fc.api_keys.elevenlabs.is_none());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file_from(&dir.path().join("absent.toml"));
        assert!(fc.capture.silence_timeout_ms.is_none());
    }

    #[test]
    fn malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture\nsilence_timeout_ms = ").unwrap();
        let fc = load_config_file_from(&path);
        assert!(fc.capture.silence_timeout_ms.is_none());
    }
}
