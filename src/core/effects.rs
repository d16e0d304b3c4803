//! Collaborators a turn fans out to once the reply text is final, and the
//! rendering boundary the session reports to.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::character::record::VoiceConfig;
use crate::core::config::{ApiTokens, DataPaths, Settings, TranslatorKind};
use crate::core::emotion::{Emotion, EmotionClassifier, HttpEmotionClassifier};
use crate::providers::{format_api_error, ProviderError};

pub const ELEVENLABS_TOKEN_KEY: &str = "elevenlabs_api_token";
pub const HUGGINGFACE_TOKEN_KEY: &str = "huggingface_token";

const GOOGLE_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";
const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const ELEVENLABS_MODEL: &str = "eleven_multilingual_v2";

/// Language the LLM is addressed in when user input is translated.
pub const MODEL_LANGUAGE: &str = "en";

/// Where a session shows what is happening. Implemented by the UI.
pub trait SessionSink: Send {
    /// A complete message, shown immediately.
    fn display_message(&mut self, author: &str, text: &str, is_user: bool);

    /// The reply being streamed; `text` is everything received so far.
    fn update_reply(&mut self, author: &str, text: &str);

    /// The reply is final; `text` has placeholders resolved and may differ
    /// from the last streamed update.
    fn finish_reply(&mut self, author: &str, text: &str);

    fn set_expression(&mut self, character_name: &str, emotion: Emotion);

    fn set_input_enabled(&mut self, enabled: bool);

    fn notify_error(&mut self, message: &str);

    /// A synthesized clip is ready for playback.
    fn play_audio(&mut self, _path: &Path) {}
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError>;
}

/// Google's public translate endpoint (`client=gtx`).
pub struct GoogleTranslator {
    client: reqwest::Client,
}

impl GoogleTranslator {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Joins the translated segments of a `translate_a/single` response.
fn parse_google_translation(body: &Value) -> Option<String> {
    let segments = body.get(0)?.as_array()?;
    let text: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(GOOGLE_TRANSLATE_URL)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_language),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message: format_api_error(&body),
            });
        }
        let body: Value = response.json().await?;
        parse_google_translation(&body)
            .ok_or_else(|| ProviderError::Protocol("empty translation".to_string()))
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Renders `text` with `voice` and returns the audio file written.
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<PathBuf, ProviderError>;
}

pub struct ElevenLabsSpeech {
    client: reqwest::Client,
    api_key: String,
    output_dir: PathBuf,
}

impl ElevenLabsSpeech {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            output_dir,
        }
    }

    fn clip_path(&self, voice_id: &str) -> PathBuf {
        let safe: String = voice_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.output_dir.join(format!("elevenlabs-{safe}.mp3"))
    }

    fn write_clip(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let mut temp_file = NamedTempFile::new_in(&self.output_dir)?;
        temp_file.write_all(bytes)?;
        temp_file.flush()?;
        temp_file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<PathBuf, ProviderError> {
        let VoiceConfig::ElevenLabs { voice_id } = voice else {
            return Err(ProviderError::Unsupported("voice backend without a synthesizer"));
        };

        let response = self
            .client
            .post(format!("{ELEVENLABS_URL}/{voice_id}"))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&json!({ "text": text, "model_id": ELEVENLABS_MODEL }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message: format_api_error(&body),
            });
        }

        let audio = response.bytes().await?;
        let path = self.clip_path(voice_id);
        self.write_clip(&path, &audio)
            .map_err(ProviderError::Process)?;
        debug!(path = %path.display(), bytes = audio.len(), "speech clip written");
        Ok(path)
    }
}

/// Microphone input. The recognized utterance is sent as a user message.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn listen(&self) -> Result<String, ProviderError>;
}

/// The optional side effects available to a session.
#[derive(Default)]
pub struct Effects {
    pub translator: Option<Box<dyn Translator>>,
    pub classifier: Option<Box<dyn EmotionClassifier>>,
    pub speech: Option<Box<dyn SpeechSynthesizer>>,
}

impl Effects {
    /// Builds whatever the settings and stored tokens make available.
    pub fn from_config(settings: &Settings, tokens: &ApiTokens, paths: &DataPaths) -> Self {
        let client = reqwest::Client::new();

        let translator: Option<Box<dyn Translator>> = match settings.main_settings.translator {
            TranslatorKind::Google => Some(Box::new(GoogleTranslator::new(client.clone()))),
            TranslatorKind::Disabled => None,
        };

        let classifier: Option<Box<dyn EmotionClassifier>> = Some(Box::new(
            HttpEmotionClassifier::new(
                settings.main_settings.emotion_classifier_url.clone(),
                tokens.get(HUGGINGFACE_TOKEN_KEY).map(str::to_owned),
            ),
        ));

        let speech: Option<Box<dyn SpeechSynthesizer>> =
            tokens.get(ELEVENLABS_TOKEN_KEY).map(|key| {
                Box::new(ElevenLabsSpeech::new(client.clone(), key, paths.audio_dir()))
                    as Box<dyn SpeechSynthesizer>
            });

        Self {
            translator,
            classifier,
            speech,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn google_segments_are_joined() {
        let body: Value = serde_json::from_str(
            r#"[[["Hello, ","Привет, ",null,null,10],["how are you?","как дела?",null,null,10]],null,"ru"]"#,
        )
        .unwrap();
        assert_eq!(
            parse_google_translation(&body).as_deref(),
            Some("Hello, how are you?")
        );
        assert_eq!(parse_google_translation(&json!([[]])), None);
        assert_eq!(parse_google_translation(&json!({})), None);
    }

    #[test]
    fn clip_path_is_filesystem_safe() {
        let speech = ElevenLabsSpeech::new(reqwest::Client::new(), "k", PathBuf::from("/tmp/a"));
        assert_eq!(
            speech.clip_path("abc/../x"),
            PathBuf::from("/tmp/a/elevenlabs-abc____x.mp3")
        );
    }

    #[test]
    fn clips_are_written_atomically() {
        let dir = TempDir::new().unwrap();
        let speech = ElevenLabsSpeech::new(
            reqwest::Client::new(),
            "k",
            dir.path().join("audio"),
        );
        let path = speech.clip_path("voice");
        speech.write_clip(&path, b"ID3").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3");
    }

    #[tokio::test]
    async fn non_elevenlabs_voices_are_unsupported() {
        let speech = ElevenLabsSpeech::new(reqwest::Client::new(), "k", PathBuf::from("/tmp"));
        let voice = VoiceConfig::EdgeTts {
            voice: "en-US-AriaNeural".to_string(),
        };
        let err = speech.synthesize("hi", &voice).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }

    #[test]
    fn effects_follow_configuration() {
        let dir = TempDir::new().unwrap();
        let paths = DataPaths::new(dir.path());
        let effects = Effects::from_config(&Settings::default(), &ApiTokens::default(), &paths);
        assert!(effects.translator.is_none());
        assert!(effects.speech.is_none());
        assert!(effects.classifier.is_some());

        let mut settings = Settings::default();
        settings.main_settings.translator = TranslatorKind::Google;
        let mut tokens = ApiTokens::default();
        tokens.set(ELEVENLABS_TOKEN_KEY, "el-key");
        let effects = Effects::from_config(&settings, &tokens, &paths);
        assert!(effects.translator.is_some());
        assert!(effects.speech.is_some());
    }
}
