//! Adding, listing and removing characters.
//!
//! Every new character starts with its greeting as message 1. Characters
//! talking to Character AI additionally get a fresh remote chat, whose
//! greeting turn replaces the local seed so the ledger carries the remote
//! correlation data from the start.

use std::path::Path;
use tracing::{info, warn};

use crate::character::card::{self, CardLoadError};
use crate::character::record::{CharacterRecord, ConversationMethod};
use crate::core::ledger::Ledger;
use crate::core::store::{CharacterStore, StoreError};
use crate::providers::character_ai::{CharacterAiClient, CharacterInfo, NewChat};
use crate::providers::ProviderError;

/// Errors that can occur during character operations.
#[derive(Debug)]
pub enum CharacterServiceError {
    /// Failed to load or parse a character card file.
    Load(CardLoadError),

    /// Reading or writing `characters.json` failed.
    Store(StoreError),

    /// The character could not be looked up remotely.
    Provider(ProviderError),

    /// Cards cannot be bound to a stateful backend.
    UnsupportedMethod(ConversationMethod),

    /// A new Character AI chat came back without its greeting turn.
    MissingGreeting(String),
}

impl std::fmt::Display for CharacterServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CharacterServiceError::Load(err) => write!(f, "{err}"),
            CharacterServiceError::Store(err) => write!(f, "{err}"),
            CharacterServiceError::Provider(err) => write!(f, "{err}"),
            CharacterServiceError::UnsupportedMethod(method) => write!(
                f,
                "{method} characters are created from their character id, not from a card"
            ),
            CharacterServiceError::MissingGreeting(chat_id) => write!(
                f,
                "Character AI opened chat {chat_id} without a greeting; try adding the character again"
            ),
        }
    }
}

impl std::error::Error for CharacterServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CharacterServiceError::Load(err) => Some(err),
            CharacterServiceError::Store(err) => Some(err),
            CharacterServiceError::Provider(err) => Some(err),
            CharacterServiceError::UnsupportedMethod(_)
            | CharacterServiceError::MissingGreeting(_) => None,
        }
    }
}

impl From<CardLoadError> for CharacterServiceError {
    fn from(err: CardLoadError) -> Self {
        CharacterServiceError::Load(err)
    }
}

impl From<StoreError> for CharacterServiceError {
    fn from(err: StoreError) -> Self {
        CharacterServiceError::Store(err)
    }
}

impl From<ProviderError> for CharacterServiceError {
    fn from(err: ProviderError) -> Self {
        CharacterServiceError::Provider(err)
    }
}

/// One line of `list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSummary {
    pub name: String,
    pub conversation_method: ConversationMethod,
    pub messages: usize,
}

pub struct CharacterService {
    store: CharacterStore,
}

impl CharacterService {
    pub fn new(store: CharacterStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CharacterStore {
        &self.store
    }

    pub fn list(&self) -> Result<Vec<CharacterSummary>, CharacterServiceError> {
        Ok(self
            .store
            .load()?
            .character_list
            .into_values()
            .map(|record| CharacterSummary {
                messages: record.chat_content.len(),
                name: record.character_name,
                conversation_method: record.conversation_method,
            })
            .collect())
    }

    pub fn get(&self, name: &str) -> Result<CharacterRecord, CharacterServiceError> {
        Ok(self.store.get(name)?)
    }

    /// Stores a new record; fails if the name is taken.
    pub fn add(&self, record: CharacterRecord) -> Result<CharacterRecord, CharacterServiceError> {
        self.store.insert(record.clone())?;
        info!(
            character = %record.character_name,
            method = record.conversation_method.id(),
            "character created"
        );
        Ok(record)
    }

    pub fn add_from_card(
        &self,
        path: &Path,
        method: ConversationMethod,
    ) -> Result<CharacterRecord, CharacterServiceError> {
        if method.is_stateful() {
            return Err(CharacterServiceError::UnsupportedMethod(method));
        }
        let record = card::load_card(path)?.into_record(method);
        self.add(record)
    }

    /// Looks the character up on Character AI and opens a new chat with it.
    pub async fn add_from_character_ai(
        &self,
        client: &CharacterAiClient,
        character_id: &str,
    ) -> Result<CharacterRecord, CharacterServiceError> {
        let info = client.character_info(character_id).await?;
        let chat = client.create_chat(character_id).await?;
        self.add(character_ai_record(info, chat)?)
    }

    pub fn remove(&self, name: &str) -> Result<CharacterRecord, CharacterServiceError> {
        let record = self.store.remove(name)?;
        info!(character = name, "character removed");
        Ok(record)
    }
}

/// Builds the record for a freshly opened Character AI chat. Message 1 is
/// the remote greeting turn, so later reconciliation keeps its ID.
fn character_ai_record(
    info: CharacterInfo,
    chat: NewChat,
) -> Result<CharacterRecord, CharacterServiceError> {
    let Some(mut greeting) = chat.greeting else {
        warn!(chat_id = %chat.chat_id, "new chat has no greeting turn");
        return Err(CharacterServiceError::MissingGreeting(chat.chat_id));
    };
    greeting.author_name = info.name.clone();

    let mut record =
        CharacterRecord::new(&info.name, &greeting.text, ConversationMethod::CharacterAi);
    record.character_id = Some(info.external_id);
    record.chat_id = Some(chat.chat_id);
    record.character_title = info.title;
    record.character_description = info.description;
    record.character_avatar = info.avatar_file_name;
    record.chat_content = Ledger::default();
    record.chat_content.reconcile_remote(vec![greeting]);
    Ok(record)
}
