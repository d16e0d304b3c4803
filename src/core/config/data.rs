use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::character::record::ConversationMethod;

pub const DEFAULT_USER_NAME: &str = "User";
pub const DEFAULT_TARGET_LANGUAGE: &str = "en";
pub const DEFAULT_LOCAL_LLM_PORT: u16 = 5001;
pub const DEFAULT_EMOTION_CLASSIFIER_URL: &str =
    "https://api-inference.huggingface.co/models/SamLowe/roberta-base-go_emotions";

/// Translation service used around the LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TranslatorKind {
    #[default]
    #[serde(rename = "None")]
    Disabled,
    #[serde(rename = "Google")]
    Google,
}

/// Which side of the conversation gets translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TranslationMode {
    /// User input is translated before sending and replies after receiving.
    #[default]
    #[serde(rename = "Both")]
    Both,
    /// Only the user's input is translated before the LLM sees it.
    #[serde(rename = "User Input")]
    UserInput,
    /// Only the character's replies are translated for display and speech.
    #[serde(rename = "Character Output")]
    CharacterOutput,
}

impl TranslationMode {
    pub fn translates_input(self) -> bool {
        matches!(self, TranslationMode::Both | TranslationMode::UserInput)
    }

    pub fn translates_output(self) -> bool {
        matches!(self, TranslationMode::Both | TranslationMode::CharacterOutput)
    }
}

fn default_target_language() -> String {
    DEFAULT_TARGET_LANGUAGE.to_string()
}

fn default_local_llm_port() -> u16 {
    DEFAULT_LOCAL_LLM_PORT
}

fn default_emotion_classifier_url() -> String {
    DEFAULT_EMOTION_CLASSIFIER_URL.to_string()
}

fn default_user_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MainSettings {
    #[serde(default)]
    pub translator: TranslatorKind,
    #[serde(default)]
    pub translator_mode: TranslationMode,
    /// Language code the conversation is translated into for the user
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// GGUF (or other) model file passed to the local server
    #[serde(default)]
    pub local_llm_model: Option<String>,
    /// Executable that serves an OpenAI-compatible API (e.g. llama-server)
    #[serde(default)]
    pub local_llm_server_command: Option<String>,
    #[serde(default = "default_local_llm_port")]
    pub local_llm_port: u16,
    #[serde(default)]
    pub local_llm_context_size: Option<u32>,
    #[serde(default = "default_emotion_classifier_url")]
    pub emotion_classifier_url: String,
    /// Model overrides keyed by conversation method id (e.g. "openrouter")
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Keys this crate does not interpret, preserved on save
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for MainSettings {
    fn default() -> Self {
        Self {
            translator: TranslatorKind::default(),
            translator_mode: TranslationMode::default(),
            target_language: default_target_language(),
            local_llm_model: None,
            local_llm_server_command: None,
            local_llm_port: default_local_llm_port(),
            local_llm_context_size: None,
            emotion_classifier_url: default_emotion_classifier_url(),
            models: HashMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserData {
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default)]
    pub user_description: String,
    #[serde(default)]
    pub user_avatar: Option<String>,
}

impl Default for UserData {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            user_description: String::new(),
            user_avatar: None,
        }
    }
}

/// Contents of `settings.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub main_settings: MainSettings,
    #[serde(default)]
    pub user_data: UserData,
}

impl Settings {
    /// Display name used for `{{user}}`, falling back to the default when blank.
    pub fn user_name(&self) -> &str {
        let name = self.user_data.user_name.trim();
        if name.is_empty() {
            DEFAULT_USER_NAME
        } else {
            name
        }
    }

    pub fn model_override(&self, method: ConversationMethod) -> Option<&str> {
        self.main_settings
            .models
            .get(method.id())
            .map(String::as_str)
            .filter(|model| !model.trim().is_empty())
    }

    pub fn translation_enabled(&self) -> bool {
        self.main_settings.translator != TranslatorKind::Disabled
    }
}

/// Contents of `api.json`: token name to token.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(transparent)]
pub struct ApiTokens(pub BTreeMap<String, String>);

impl ApiTokens {
    /// Non-blank value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigurationError> {
        self.get(key)
            .ok_or_else(|| ConfigurationError::MissingToken(key.to_string()))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

/// A required setting is absent; raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No token stored under this `api.json` key.
    MissingToken(String),

    /// A `settings.json` value needed by the selected backend is absent.
    MissingSetting(String),

    /// The record or settings name something this build cannot use.
    Unsupported(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingToken(key) => {
                write!(f, "No API token configured under '{key}' in api.json")
            }
            ConfigurationError::MissingSetting(key) => {
                write!(f, "Setting '{key}' is required but not set in settings.json")
            }
            ConfigurationError::Unsupported(what) => write!(f, "Unsupported configuration: {what}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
