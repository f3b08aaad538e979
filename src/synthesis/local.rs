//! Local text-to-speech through an installed speech engine
//!
//! Shells out to `espeak-ng` (or a compatible binary) with `--stdout`, so the
//! engine writes a WAV stream that is decoded and played like remote audio.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::playback::{AudioSink, decode_audio};
use super::{PlaybackHandle, ProviderId, SynthesisProvider};
use crate::{Error, Result};

/// Base speaking rate in words per minute
const BASE_WPM: f32 = 175.0;

/// Base pitch on the engine's 0-99 scale
const BASE_PITCH: f32 = 50.0;

/// Local engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTtsConfig {
    /// Engine binary name or path
    pub binary: String,
    /// Preferred voice name or language tag
    pub voice_hint: String,
    /// Speaking rate multiplier
    pub rate: f32,
    /// Pitch multiplier
    pub pitch: f32,
}

impl Default for LocalTtsConfig {
    fn default() -> Self {
        Self {
            binary: "espeak-ng".to_string(),
            voice_hint: "en-us".to_string(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// A voice the local engine offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVoice {
    /// Display name, e.g. `English_(America)`
    pub name: String,
    /// Language tag, e.g. `en-us`
    pub language: String,
    /// Voice file identifier passed to `-v`
    pub identifier: String,
}

/// Parse the engine's `--voices` table
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 2)
/// ```
#[must_use]
pub fn parse_voice_list(output: &str) -> Vec<LocalVoice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            Some(LocalVoice {
                language: fields[1].to_ascii_lowercase(),
                name: fields[3].to_string(),
                identifier: fields[4].to_string(),
            })
        })
        .collect()
}

/// Choose the voice that best matches `hint`
///
/// Tries an exact name or identifier match, then an exact language, then a
/// name containing the hint, then any voice sharing the hint's base language.
#[must_use]
pub fn pick_voice<'a>(voices: &'a [LocalVoice], hint: &str) -> Option<&'a LocalVoice> {
    let hint = hint.trim().to_ascii_lowercase();
    if hint.is_empty() {
        return voices.first();
    }
    let base = hint.split(['-', '_']).next().unwrap_or(&hint);

    voices
        .iter()
        .find(|v| v.name.to_ascii_lowercase() == hint || v.identifier.to_ascii_lowercase() == hint)
        .or_else(|| voices.iter().find(|v| v.language == hint))
        .or_else(|| voices.iter().find(|v| v.name.to_ascii_lowercase().contains(&hint)))
        .or_else(|| {
            voices
                .iter()
                .find(|v| v.language.split('-').next() == Some(base))
        })
}

/// Secondary provider backed by a local speech engine
pub struct LocalTtsProvider {
    config: LocalTtsConfig,
    sink: Arc<dyn AudioSink>,
    voices: OnceCell<Vec<LocalVoice>>,
}

impl LocalTtsProvider {
    /// Create a local provider
    #[must_use]
    pub fn new(config: LocalTtsConfig, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            config,
            sink,
            voices: OnceCell::new(),
        }
    }

    /// Resolved engine path, if installed
    #[must_use]
    pub fn engine_path(&self) -> Option<PathBuf> {
        which::which(&self.config.binary).ok()
    }

    /// Voices the engine offers; listed once and cached
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be run
    pub async fn voices(&self) -> Result<&[LocalVoice]> {
        let voices = self
            .voices
            .get_or_try_init(|| async {
                let output = Command::new(&self.config.binary)
                    .arg("--voices")
                    .output()
                    .await
                    .map_err(|e| Error::Provider(format!("failed to list voices: {e}")))?;
                let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
                tracing::debug!(count = voices.len(), "listed local voices");
                Ok::<_, Error>(voices)
            })
            .await?;
        Ok(voices)
    }

    /// Engine arguments for the configured rate and pitch
    fn prosody_args(&self) -> [String; 4] {
        let wpm = (BASE_WPM * self.config.rate).clamp(80.0, 450.0).round();
        let pitch = (BASE_PITCH * self.config.pitch).clamp(0.0, 99.0).round();
        [
            "-s".to_string(),
            format!("{wpm}"),
            "-p".to_string(),
            format!("{pitch}"),
        ]
    }

    /// Render `text` to WAV bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Provider` if the engine fails or produces no audio
    pub async fn render(&self, text: &str) -> Result<Vec<u8>> {
        let voices = self.voices().await.unwrap_or_default();
        let voice = pick_voice(voices, &self.config.voice_hint)
            .map_or_else(|| self.config.voice_hint.clone(), |v| v.identifier.clone());

        let mut child = Command::new(&self.config.binary)
            .arg("--stdout")
            .arg("--stdin")
            .arg("-v")
            .arg(&voice)
            .args(self.prosody_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Provider(format!("failed to spawn {}: {e}", self.config.binary)))?;

        // Feed the text while draining stdout; the engine writes audio as it
        // reads, so a full stdout pipe would otherwise stall both sides
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(text.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| Error::Provider(format!("local engine failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provider(format!(
                "local engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        fed.map_err(|e| Error::Provider(format!("failed to write to engine stdin: {e}")))?;
        if output.stdout.is_empty() {
            return Err(Error::Provider("local engine produced no audio".to_string()));
        }

        tracing::debug!(voice = %voice, bytes = output.stdout.len(), "rendered local speech");
        Ok(output.stdout)
    }
}

#[async_trait]
impl SynthesisProvider for LocalTtsProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Secondary
    }

    fn is_available(&self) -> bool {
        self.engine_path().is_some()
    }

    async fn speak(&self, text: &str) -> Result<PlaybackHandle> {
        let bytes = self.render(text).await?;
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

    const VOICES: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  de              --/M      German             gmw/de
 2  en-gb           --/M      English_(Great_Britain) gmw/en            (en 2)
 5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
 5  fr-fr           --/M      French_(France)    roa/fr               (fr 5)
";

    #[test]
    fn parses_voice_table() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(voices.len(), 4);
        assert_eq!(voices[2].language, "en-us");
        assert_eq!(voices[2].name, "English_(America)");
        assert_eq!(voices[2].identifier, "gmw/en-US");
    }

    #[test]
    fn picks_exact_language() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(pick_voice(&voices, "en-US").unwrap().name, "English_(America)");
    }

    #[test]
    fn picks_by_name_fragment() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(pick_voice(&voices, "french").unwrap().language, "fr-fr");
    }

    #[test]
    fn falls_back_to_base_language() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(pick_voice(&voices, "de-AT").unwrap().name, "German");
        assert!(pick_voice(&voices, "ja").is_none());
    }

    #[test]
    fn empty_hint_takes_first_voice() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(pick_voice(&voices, "").unwrap().name, "German");
    }

    /// Stand-in engine that echoes stdin back as its "audio"
    #[cfg(unix)]
    fn echo_engine(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-espeak");
        std::fs::write(
            &path,
            "#!/bin/sh\nif [ \"$1\" = \"--voices\" ]; then exit 0; fi\nexec cat\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn render_streams_long_text_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalTtsProvider::new(
            LocalTtsConfig {
                binary: echo_engine(dir.path()),
                ..LocalTtsConfig::default()
            },
            Arc::new(crate::synthesis::CpalSink::new()),
        );

        // Well past a pipe buffer in both directions
        let text = "the quick brown fox jumps over the lazy dog\n".repeat(20_000);
        let audio = tokio::time::timeout(std::time::Duration::from_secs(30), provider.render(&text))
            .await
            .expect("engine stalled")
            .unwrap();
        assert_eq!(audio, text.as_bytes());
    }

    #[test]
    fn prosody_is_clamped() {
        let provider = LocalTtsProvider::new(
            LocalTtsConfig {
                rate: 10.0,
                pitch: 3.0,
                ..LocalTtsConfig::default()
            },
            Arc::new(crate::synthesis::CpalSink::new()),
        );
        let args = provider.prosody_args();
        assert_eq!(args[1], "450");
        assert_eq!(args[3], "99");
    }

    #[test]
    fn missing_engine_is_unavailable() {
        let provider = LocalTtsProvider::new(
            LocalTtsConfig {
                binary: "definitely-not-a-speech-engine".to_string(),
                ..LocalTtsConfig::default()
            },
            Arc::new(crate::synthesis::CpalSink::new()),
        );
        assert!(!provider.is_available());
    }
}
