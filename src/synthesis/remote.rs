//! Remote neural text-to-speech
//!
//! Sends text to a hosted TTS API, decodes the returned audio and plays it
//! through an [`AudioSink`]. The API key comes from the injected credential
//! store; a missing key makes the provider unavailable without any request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::playback::{AudioSink, decode_audio};
use super::{PlaybackHandle, ProviderId, SynthesisProvider};
use crate::providers::{CredentialStore, names};
use crate::{Error, Result};

/// Hosted TTS API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// `ElevenLabs` text-to-speech
    ElevenLabs,
    /// `OpenAI` audio speech
    OpenAi,
    /// Google Cloud Text-to-Speech
    Google,
}

impl RemoteBackend {
    /// Credential store key for this backend
    #[must_use]
    pub const fn credential_name(self) -> &'static str {
        match self {
            Self::ElevenLabs => names::ELEVENLABS,
            Self::OpenAi => names::OPENAI,
            Self::Google => names::GOOGLE,
        }
    }

    const fn default_base_url(self) -> &'static str {
        match self {
            Self::ElevenLabs => "https://api.elevenlabs.io",
            Self::OpenAi => "https://api.openai.com",
            Self::Google => "https://texttospeech.googleapis.com",
        }
    }
}

impl std::str::FromStr for RemoteBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elevenlabs" | "eleven" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            "google" | "gcloud" => Ok(Self::Google),
            other => Err(Error::Config(format!("unknown remote TTS backend: {other}"))),
        }
    }
}

/// Remote TTS settings
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTtsConfig {
    /// Which API to call
    pub backend: RemoteBackend,
    /// Voice identifier
    pub voice_id: String,
    /// Model identifier
    pub model_id: String,
    /// Speaking rate multiplier
    pub speed: f32,
    /// Override for the API base URL
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RemoteTtsConfig {
    /// Defaults for a backend
    #[must_use]
    pub fn for_backend(backend: RemoteBackend) -> Self {
        let (voice_id, model_id) = match backend {
            RemoteBackend::ElevenLabs => ("21m00Tcm4TlvDq8ikWAM", "eleven_monolingual_v1"),
            RemoteBackend::OpenAi => ("alloy", "tts-1"),
            RemoteBackend::Google => ("en-US-Neural2-F", "en-US"),
        };
        Self {
            backend,
            voice_id: voice_id.to_string(),
            model_id: model_id.to_string(),
            speed: 1.0,
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }

    fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.backend.default_base_url())
            .trim_end_matches('/')
    }
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self::for_backend(RemoteBackend::ElevenLabs)
    }
}

/// Google Cloud TTS response body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleSynthesizeResponse {
    audio_content: String,
}

/// Pull a human-readable message out of an API error body
///
/// Handles `{"detail": "..."}`, `{"detail": {"message": "..."}}` and
/// `{"error": {"message": "..."}}`; falls back to the raw body.
#[must_use]
pub fn error_detail(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let detail = v.get("detail");
        detail
            .and_then(serde_json::Value::as_str)
            .or_else(|| detail.and_then(|d| d.get("message")).and_then(serde_json::Value::as_str))
            .or_else(|| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(serde_json::Value::as_str)
            })
            .map(ToString::to_string)
    });

    message.unwrap_or_else(|| body.trim().chars().take(200).collect())
}

/// Primary provider backed by a hosted TTS API
pub struct RemoteTtsProvider {
    client: reqwest::Client,
    config: RemoteTtsConfig,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn AudioSink>,
}

impl RemoteTtsProvider {
    /// Create a remote provider
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        config: RemoteTtsConfig,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            credentials,
            sink,
        })
    }

    /// Provider settings
    #[must_use]
    pub const fn config(&self) -> &RemoteTtsConfig {
        &self.config
    }

    /// Fetch synthesized audio bytes for `text`
    ///
    /// # Errors
    ///
    /// Returns `Error::Provider` on a missing key, HTTP failure, error status
    /// or empty response
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let name = self.config.backend.credential_name();
        let api_key = self
            .credentials
            .get(name)?
            .ok_or_else(|| Error::Provider(format!("{name} API key not configured")))?;
        let api_key = api_key.expose_secret();

        let audio = match self.config.backend {
            RemoteBackend::ElevenLabs => self.synthesize_elevenlabs(api_key, text).await?,
            RemoteBackend::OpenAi => self.synthesize_openai(api_key, text).await?,
            RemoteBackend::Google => self.synthesize_google(api_key, text).await?,
        };

        if audio.is_empty() {
            return Err(Error::Provider("empty audio response".to_string()));
        }
        tracing::debug!(bytes = audio.len(), backend = ?self.config.backend, "synthesized audio");
        Ok(audio)
    }

    /// Synthesize using `ElevenLabs`
    async fn synthesize_elevenlabs(&self, api_key: &str, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url(),
            self.config.voice_id
        );
        let request = ElevenLabsRequest {
            text,
            model_id: &self.config.model_id,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(provider_http)?;

        read_audio(response, "ElevenLabs").await
    }

    /// Synthesize using `OpenAI`
    async fn synthesize_openai(&self, api_key: &str, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.config.model_id,
            input: text,
            voice: &self.config.voice_id,
            speed: self.config.speed,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.config.base_url()))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(provider_http)?;

        read_audio(response, "OpenAI").await
    }

    /// Synthesize using Google Cloud; audio arrives base64-encoded
    async fn synthesize_google(&self, api_key: &str, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "input": { "text": text },
            "voice": {
                "languageCode": self.config.model_id,
                "name": self.config.voice_id,
            },
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "speakingRate": self.config.speed,
            },
        });

        let response = self
            .client
            .post(format!("{}/v1/text:synthesize", self.config.base_url()))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(provider_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Google TTS error {status}: {}",
                error_detail(&body)
            )));
        }

        let parsed: GoogleSynthesizeResponse = response.json().await.map_err(provider_http)?;
        base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_content)
            .map_err(|e| Error::Provider(format!("malformed Google TTS audio: {e}")))
    }
}

fn provider_http(e: reqwest::Error) -> Error {
    Error::Provider(format!("request failed: {e}"))
}

async fn read_audio(response: reqwest::Response, api: &str) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Provider(format!(
            "{api} TTS error {status}: {}",
            error_detail(&body)
        )));
    }
    let audio = response.bytes().await.map_err(provider_http)?;
    Ok(audio.to_vec())
}

#[async_trait]
impl SynthesisProvider for RemoteTtsProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Primary
    }

    fn is_available(&self) -> bool {
        self.credentials.contains(self.config.backend.credential_name())
    }

    async fn speak(&self, text: &str) -> Result<PlaybackHandle> {
        let bytes = self.synthesize(text).await?;
        let audio = decode_audio(&bytes).map_err(|e| Error::Provider(e.to_string()))?;
        self.sink
            .play(audio)
            .await
            .map_err(|e| Error::Provider(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_string() {
        assert_eq!(error_detail(r#"{"detail":"quota exceeded"}"#), "quota exceeded");
    }

    #[test]
    fn detail_object() {
        assert_eq!(
            error_detail(r#"{"detail":{"status":"invalid_api_key","message":"Invalid API key"}}"#),
            "Invalid API key"
        );
    }

    #[test]
    fn nested_error_message() {
        assert_eq!(
            error_detail(r#"{"error":{"code":400,"message":"Voice not found"}}"#),
            "Voice not found"
        );
    }

    #[test]
    fn raw_body_fallback() {
        assert_eq!(error_detail("  Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn backend_defaults() {
        let config = RemoteTtsConfig::for_backend(RemoteBackend::OpenAi);
        assert_eq!(config.voice_id, "alloy");
        assert_eq!(config.base_url(), "https://api.openai.com");
        assert_eq!("ElevenLabs".parse::<RemoteBackend>().unwrap(), RemoteBackend::ElevenLabs);
    }

    #[test]
    fn base_url_override_is_trimmed() {
        let config = RemoteTtsConfig {
            base_url: Some("http://127.0.0.1:9000/".to_string()),
            ..RemoteTtsConfig::default()
        };
        assert_eq!(config.base_url(), "http://127.0.0.1:9000");
    }
}
