//! Persisted per-character state.
//!
//! A [`CharacterRecord`] bundles the profile, voice, backend selection and the
//! message ledger of one character. It is stored under the character's name in
//! `characters.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::emotion::Emotion;
use crate::core::ledger::Ledger;
use crate::core::message::{HistoryText, Message, MessageId};

/// Conversational backend a character talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationMethod {
    #[serde(rename = "Character AI", alias = "CharacterAI")]
    CharacterAi,
    #[serde(rename = "Mistral AI", alias = "MistralAI")]
    MistralAi,
    #[serde(rename = "Open AI", alias = "OpenAI")]
    OpenAi,
    #[serde(rename = "OpenRouter")]
    OpenRouter,
    #[serde(rename = "Local LLM", alias = "LocalLLM")]
    LocalLlm,
}

impl ConversationMethod {
    pub const ALL: [ConversationMethod; 5] = [
        ConversationMethod::CharacterAi,
        ConversationMethod::MistralAi,
        ConversationMethod::OpenAi,
        ConversationMethod::OpenRouter,
        ConversationMethod::LocalLlm,
    ];

    /// Whether the remote service keeps the conversation history itself.
    pub fn is_stateful(self) -> bool {
        matches!(self, ConversationMethod::CharacterAi)
    }

    /// Identifier used in the builtin provider table and settings keys.
    pub fn id(self) -> &'static str {
        match self {
            ConversationMethod::CharacterAi => "character_ai",
            ConversationMethod::MistralAi => "mistral",
            ConversationMethod::OpenAi => "openai",
            ConversationMethod::OpenRouter => "openrouter",
            ConversationMethod::LocalLlm => "local_llm",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ConversationMethod::CharacterAi => "Character AI",
            ConversationMethod::MistralAi => "Mistral AI",
            ConversationMethod::OpenAi => "Open AI",
            ConversationMethod::OpenRouter => "OpenRouter",
            ConversationMethod::LocalLlm => "Local LLM",
        }
    }

    /// Parses either the id or the display name, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|method| {
            method.id().eq_ignore_ascii_case(value)
                || method.display_name().eq_ignore_ascii_case(value)
                || method
                    .display_name()
                    .replace(' ', "")
                    .eq_ignore_ascii_case(value)
        })
    }
}

impl fmt::Display for ConversationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Visual channel that reacts to detected emotions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SowSystemMode {
    #[default]
    #[serde(rename = "Nothing", alias = "None")]
    Nothing,
    #[serde(rename = "Expressions Images", alias = "ExpressionImages")]
    ExpressionImages,
    #[serde(rename = "Live2D Model", alias = "Live2DModel")]
    Live2DModel,
}

impl SowSystemMode {
    pub fn detects_emotion(self) -> bool {
        !matches!(self, SowSystemMode::Nothing)
    }
}

/// Speech backend plus its voice identifier; only one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "voice_type")]
pub enum VoiceConfig {
    #[default]
    #[serde(rename = "None")]
    Silent,
    #[serde(rename = "Character AI")]
    CharacterAi { voice_id: String },
    #[serde(rename = "ElevenLabs")]
    ElevenLabs { voice_id: String },
    #[serde(rename = "XTTSv2")]
    XttsRvc {
        speaker_wav: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rvc_model: Option<String>,
    },
    #[serde(rename = "Edge TTS")]
    EdgeTts { voice: String },
}

impl VoiceConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, VoiceConfig::Silent)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            VoiceConfig::Silent => "None",
            VoiceConfig::CharacterAi { .. } => "Character AI",
            VoiceConfig::ElevenLabs { .. } => "ElevenLabs",
            VoiceConfig::XttsRvc { .. } => "XTTSv2",
            VoiceConfig::EdgeTts { .. } => "Edge TTS",
        }
    }
}

/// Everything stored for one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CharacterRecordRepr", into = "CharacterRecordRepr")]
pub struct CharacterRecord {
    pub character_name: String,
    pub character_id: Option<String>,
    pub chat_id: Option<String>,
    pub character_avatar: Option<String>,
    pub character_title: String,
    pub character_description: String,
    pub character_personality: String,
    pub first_message: String,
    pub voice: VoiceConfig,
    pub conversation_method: ConversationMethod,
    pub current_sow_system_mode: SowSystemMode,
    pub current_emotion: Emotion,
    pub expression_images_folder: Option<String>,
    pub live2d_model_folder: Option<String>,
    pub chat_content: Ledger,
}

impl CharacterRecord {
    /// Creates a record whose ledger holds the greeting as message 1.
    pub fn new(
        name: impl Into<String>,
        first_message: impl Into<String>,
        conversation_method: ConversationMethod,
    ) -> Self {
        let character_name = name.into();
        let first_message = first_message.into();
        Self {
            chat_content: Ledger::seeded(&character_name, &first_message),
            character_name,
            character_id: None,
            chat_id: None,
            character_avatar: None,
            character_title: String::new(),
            character_description: String::new(),
            character_personality: String::new(),
            first_message,
            voice: VoiceConfig::Silent,
            conversation_method,
            current_sow_system_mode: SowSystemMode::Nothing,
            current_emotion: Emotion::Neutral,
            expression_images_folder: None,
            live2d_model_folder: None,
        }
    }

    pub fn chat_history(&self) -> Vec<HistoryText> {
        self.chat_content.history_text()
    }
}

/// On-disk layout. `chat_history` is written from the ledger in the same
/// pass and ignored on read.
#[derive(Serialize, Deserialize)]
struct CharacterRecordRepr {
    #[serde(default)]
    character_name: String,
    #[serde(default)]
    character_id: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    character_avatar: Option<String>,
    #[serde(default)]
    character_title: String,
    #[serde(default)]
    character_description: String,
    #[serde(default)]
    character_personality: String,
    #[serde(default)]
    first_message: String,
    #[serde(default)]
    voice: VoiceConfig,
    conversation_method: ConversationMethod,
    #[serde(default)]
    current_sow_system_mode: SowSystemMode,
    #[serde(default)]
    current_emotion: Emotion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expression_images_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    live2d_model_folder: Option<String>,
    #[serde(default)]
    chat_content: BTreeMap<MessageId, Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_message_id: Option<MessageId>,
    #[serde(default)]
    chat_history: Vec<HistoryText>,
}

impl From<CharacterRecordRepr> for CharacterRecord {
    fn from(repr: CharacterRecordRepr) -> Self {
        Self {
            chat_content: Ledger::from_parts(repr.chat_content, repr.last_message_id),
            character_name: repr.character_name,
            character_id: repr.character_id,
            chat_id: repr.chat_id,
            character_avatar: repr.character_avatar,
            character_title: repr.character_title,
            character_description: repr.character_description,
            character_personality: repr.character_personality,
            first_message: repr.first_message,
            voice: repr.voice,
            conversation_method: repr.conversation_method,
            current_sow_system_mode: repr.current_sow_system_mode,
            current_emotion: repr.current_emotion,
            expression_images_folder: repr.expression_images_folder,
            live2d_model_folder: repr.live2d_model_folder,
        }
    }
}

impl From<CharacterRecord> for CharacterRecordRepr {
    fn from(record: CharacterRecord) -> Self {
        let chat_history = record.chat_content.history_text();
        let last_message_id = record.chat_content.high_water();
        Self {
            chat_content: record.chat_content.entries().clone(),
            last_message_id,
            chat_history,
            character_name: record.character_name,
            character_id: record.character_id,
            chat_id: record.chat_id,
            character_avatar: record.character_avatar,
            character_title: record.character_title,
            character_description: record.character_description,
            character_personality: record.character_personality,
            first_message: record.first_message,
            voice: record.voice,
            conversation_method: record.conversation_method,
            current_sow_system_mode: record.current_sow_system_mode,
            current_emotion: record.current_emotion,
            expression_images_folder: record.expression_images_folder,
            live2d_model_folder: record.live2d_model_folder,
        }
    }
}
