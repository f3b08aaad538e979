//! Speech-to-text through a hosted API

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::providers::{CredentialStore, names};
use crate::{Error, Result};

/// Response from `OpenAI` Whisper transcription API
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcription API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttBackend {
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram
    Deepgram,
}

impl SttBackend {
    /// Credential store key for this backend
    #[must_use]
    pub const fn credential_name(self) -> &'static str {
        match self {
            Self::Whisper => names::OPENAI,
            Self::Deepgram => names::DEEPGRAM,
        }
    }

    /// Default model for this backend
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }

    const fn default_base_url(self) -> &'static str {
        match self {
            Self::Whisper => "https://api.openai.com",
            Self::Deepgram => "https://api.deepgram.com",
        }
    }
}

impl std::str::FromStr for SttBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT backend: {other}"))),
        }
    }
}

/// Transcribes WAV audio to text
pub struct Transcriber {
    client: reqwest::Client,
    backend: SttBackend,
    model: String,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl Transcriber {
    /// Create a transcriber for `backend`
    #[must_use]
    pub fn new(backend: SttBackend, model: String, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend,
            model,
            base_url: backend.default_base_url().to_string(),
            credentials,
        }
    }

    /// Point requests at another host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Backend in use
    #[must_use]
    pub const fn backend(&self) -> SttBackend {
        self.backend
    }

    /// Whether an API key is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.credentials.contains(self.backend.credential_name())
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns `Error::Provider` if the key is missing or the request fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let name = self.backend.credential_name();
        let api_key = self
            .credentials
            .get(name)?
            .ok_or_else(|| Error::Provider(format!("{name} API key not configured")))?;

        let transcript = match self.backend {
            SttBackend::Whisper => self.transcribe_whisper(api_key.expose_secret(), audio).await?,
            SttBackend::Deepgram => {
                self.transcribe_deepgram(api_key.expose_secret(), audio)
                    .await?
            }
        };

        let transcript = transcript.trim().to_string();
        tracing::debug!(chars = transcript.len(), "transcription complete");
        Ok(transcript)
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(&self, api_key: &str, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Provider(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Whisper request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Provider(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed Whisper response: {e}")))?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, api_key: &str, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(format!("{}/v1/listen", self.base_url))
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header("Authorization", format!("Token {api_key}"))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Deepgram request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Provider(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed Deepgram response: {e}")))?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}
