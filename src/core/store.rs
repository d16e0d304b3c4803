//! JSON-backed character store.
//!
//! `characters.json` is the single source of truth: every mutation re-reads
//! the file, applies the change to the freshly loaded state and writes it
//! back through a temp file that is renamed over the original, so a crash
//! mid-write leaves the previous contents intact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::character::record::CharacterRecord;
use crate::core::config::data::path_display;
use crate::core::emotion::Emotion;
use crate::core::ledger::{LedgerError, RemoteMessage, Truncation};
use crate::core::message::{Message, MessageId};

pub const CHARACTERS_FILE: &str = "characters.json";

#[derive(Debug)]
pub enum StoreError {
    /// Failed to read the store file.
    Read { path: PathBuf, source: std::io::Error },

    /// The store file is not valid JSON for the expected layout.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to write the store file.
    Write { path: PathBuf, source: std::io::Error },

    /// No character with this name exists.
    CharacterNotFound(String),

    /// A character with this name already exists.
    CharacterExists(String),

    /// A ledger operation on the named character failed.
    Ledger {
        character: String,
        source: LedgerError,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::CharacterNotFound(_)
                | StoreError::Ledger {
                    source: LedgerError::MessageNotFound(_),
                    ..
                }
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Read { path, source } => write!(
                f,
                "Failed to read characters at {}: {}",
                path_display(path),
                source
            ),
            StoreError::Parse { path, source } => write!(
                f,
                "Failed to parse characters at {}: {}",
                path_display(path),
                source
            ),
            StoreError::Write { path, source } => write!(
                f,
                "Failed to write characters at {}: {}",
                path_display(path),
                source
            ),
            StoreError::CharacterNotFound(name) => write!(f, "Character '{name}' not found"),
            StoreError::CharacterExists(name) => write!(f, "Character '{name}' already exists"),
            StoreError::Ledger { character, source } => write!(f, "{character}: {source}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Read { source, .. } => Some(source),
            StoreError::Parse { source, .. } => Some(source),
            StoreError::Write { source, .. } => Some(source),
            StoreError::Ledger { source, .. } => Some(source),
            StoreError::CharacterNotFound(_) | StoreError::CharacterExists(_) => None,
        }
    }
}

/// Root object of `characters.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterList {
    #[serde(default)]
    pub character_list: BTreeMap<String, CharacterRecord>,
}

#[derive(Debug, Clone)]
pub struct CharacterStore {
    path: PathBuf,
}

impl CharacterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store located at `<configuration_dir>/characters.json`.
    pub fn in_dir(configuration_dir: &Path) -> Self {
        Self::new(configuration_dir.join(CHARACTERS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<CharacterList, StoreError> {
        if !self.path.exists() {
            return Ok(CharacterList::default());
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(CharacterList::default());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, list: &CharacterList) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let contents = serde_json::to_string_pretty(list).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;

        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    /// Loads, applies `mutator`, and persists only if it succeeded.
    pub fn mutate<F, T>(&self, mutator: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut CharacterList) -> Result<T, StoreError>,
    {
        let mut list = self.load()?;
        let result = mutator(&mut list)?;
        self.save(&list)?;
        Ok(result)
    }

    /// Read-modify-write of one character's record.
    pub fn update<F, T>(&self, name: &str, mutator: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut CharacterRecord) -> Result<T, StoreError>,
    {
        let result = self.mutate(|list| {
            let record = list
                .character_list
                .get_mut(name)
                .ok_or_else(|| StoreError::CharacterNotFound(name.to_string()))?;
            mutator(record)
        });
        if let Err(err) = &result {
            if err.is_not_found() {
                warn!(character = name, error = %err, "store update rejected");
            }
        }
        result
    }

    pub fn get(&self, name: &str) -> Result<CharacterRecord, StoreError> {
        self.load()?
            .character_list
            .remove(name)
            .ok_or_else(|| StoreError::CharacterNotFound(name.to_string()))
    }

    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load()?.character_list.into_keys().collect())
    }

    pub fn insert(&self, mut record: CharacterRecord) -> Result<(), StoreError> {
        let name = record.character_name.clone();
        self.mutate(|list| {
            if list.character_list.contains_key(&name) {
                return Err(StoreError::CharacterExists(name.clone()));
            }
            record.character_name = name.clone();
            list.character_list.insert(name.clone(), record);
            Ok(())
        })?;
        debug!(character = %name, "character added");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<CharacterRecord, StoreError> {
        self.mutate(|list| {
            list.character_list
                .remove(name)
                .ok_or_else(|| StoreError::CharacterNotFound(name.to_string()))
        })
    }

    pub fn append(
        &self,
        name: &str,
        author_name: &str,
        is_user: bool,
        text: &str,
    ) -> Result<MessageId, StoreError> {
        self.append_message(name, Message::new(author_name, is_user, text))
    }

    pub fn append_message(&self, name: &str, message: Message) -> Result<MessageId, StoreError> {
        let id = self.update(name, |record| Ok(record.chat_content.append(message)))?;
        debug!(character = name, message_id = %id, "message appended");
        Ok(id)
    }

    pub fn edit(&self, name: &str, id: MessageId, new_text: &str) -> Result<String, StoreError> {
        self.update(name, |record| {
            record
                .chat_content
                .edit(id, new_text)
                .map_err(|source| ledger_error(name, source))
        })
    }

    pub fn delete(
        &self,
        name: &str,
        ids: &[MessageId],
    ) -> Result<Vec<(MessageId, Message)>, StoreError> {
        self.update(name, |record| {
            record
                .chat_content
                .delete(ids)
                .map_err(|source| ledger_error(name, source))
        })
    }

    pub fn truncate_after(&self, name: &str, id: MessageId) -> Result<Truncation, StoreError> {
        self.update(name, |record| {
            record
                .chat_content
                .truncate_after(id)
                .map_err(|source| ledger_error(name, source))
        })
    }

    pub fn reconcile_remote(
        &self,
        name: &str,
        remote: Vec<RemoteMessage>,
    ) -> Result<(), StoreError> {
        self.update(name, |record| {
            record.chat_content.reconcile_remote(remote);
            Ok(())
        })
    }

    pub fn set_emotion(&self, name: &str, emotion: Emotion) -> Result<(), StoreError> {
        self.update(name, |record| {
            record.current_emotion = emotion;
            Ok(())
        })
    }
}

fn ledger_error(character: &str, source: LedgerError) -> StoreError {
    StoreError::Ledger {
        character: character.to_string(),
        source,
    }
}
