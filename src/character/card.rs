//! Manual character creation from `chara_card_v2` JSON cards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::character::record::{CharacterRecord, ConversationMethod};

pub const CARD_SPEC: &str = "chara_card_v2";

/// Errors that can occur when loading character cards
#[derive(Debug)]
pub enum CardLoadError {
    /// File could not be found or read
    FileNotFound(String),
    /// JSON parsing failed
    InvalidJson(String),
    /// Card validation failed
    ValidationFailed(Vec<String>),
}

impl fmt::Display for CardLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardLoadError::FileNotFound(msg) => write!(f, "File not found: {msg}"),
            CardLoadError::InvalidJson(msg) => write!(f, "Invalid JSON: {msg}"),
            CardLoadError::ValidationFailed(errors) => {
                writeln!(f, "Card validation failed:")?;
                for error in errors {
                    writeln!(f, "  • {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CardLoadError {}

/// A `chara_card_v2` character card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterCard {
    pub spec: String,
    #[serde(default)]
    pub spec_version: String,
    pub data: CharacterData,
}

/// Card fields this application uses. Real-world cards often leave some of
/// them empty or out entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CharacterData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub first_mes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl CharacterCard {
    /// Record for this card talking through `method`, seeded with the
    /// card's greeting.
    pub fn into_record(self, method: ConversationMethod) -> CharacterRecord {
        let data = self.data;
        let mut record = CharacterRecord::new(data.name, data.first_mes, method);

        let scenario = data.scenario.trim();
        record.character_description = if scenario.is_empty() {
            data.description
        } else if data.description.trim().is_empty() {
            format!("Scenario: {scenario}")
        } else {
            format!("{}\n\nScenario: {scenario}", data.description.trim_end())
        };
        record.character_personality = data.personality;
        record.character_title = data
            .creator_notes
            .map(|notes| notes.lines().next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();
        record
    }
}

/// Checks the fields a usable card must have
pub fn validate_card(card: &CharacterCard) -> Result<(), CardLoadError> {
    let mut errors = Vec::new();

    if card.spec != CARD_SPEC {
        errors.push(format!(
            "Invalid spec field: expected '{CARD_SPEC}', got '{}'",
            card.spec
        ));
    }
    if card.data.name.trim().is_empty() {
        errors.push("Character name is required and cannot be empty".to_string());
    }

    if !errors.is_empty() {
        return Err(CardLoadError::ValidationFailed(errors));
    }
    Ok(())
}

/// Load and validate a character card from a JSON file
pub fn load_card<P: AsRef<Path>>(path: P) -> Result<CharacterCard, CardLoadError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| CardLoadError::FileNotFound(format!("{}: {}", path.display(), e)))?;
    let card: CharacterCard = serde_json::from_str(&contents)
        .map_err(|e| CardLoadError::InvalidJson(format!("{}: {}", path.display(), e)))?;
    validate_card(&card)?;
    Ok(card)
}
