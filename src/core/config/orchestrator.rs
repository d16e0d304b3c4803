use crate::core::config::data::{ApiTokens, Settings};
use crate::core::config::io::{load_json, save_json, ConfigError, DataPaths};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

struct CacheState<T> {
    value: Option<T>,
    modified: Option<SystemTime>,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            value: None,
            modified: None,
        }
    }
}

/// A JSON file cached in memory and reloaded when its mtime changes.
pub(crate) struct CachedJson<T> {
    path: PathBuf,
    state: Mutex<CacheState<T>>,
}

impl<T> CachedJson<T>
where
    T: DeserializeOwned + Serialize + Default + Clone,
{
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn refresh(&self, state: &mut CacheState<T>) -> Result<T, ConfigError> {
        let disk_modified = Self::modified_time(&self.path);
        if state.value.is_none() || state.modified != disk_modified {
            let value: T = load_json(&self.path)?;
            state.modified = disk_modified;
            state.value = Some(value);
        }
        Ok(state.value.clone().unwrap_or_default())
    }

    pub(crate) fn load_with_cache(&self) -> Result<T, ConfigError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.refresh(&mut state)
    }

    pub(crate) fn persist(&self, value: T) -> Result<(), ConfigError> {
        save_json(&value, &self.path)?;
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.modified = Self::modified_time(&self.path);
        state.value = Some(value);
        Ok(())
    }

    pub(crate) fn mutate<F, R>(&self, mutator: F) -> Result<R, ConfigError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut working = self.load_with_cache()?;
        let result = mutator(&mut working);
        self.persist(working)?;
        Ok(result)
    }

    fn modified_time(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).ok()?.modified().ok()
    }
}

/// Access point for `settings.json` and `api.json`.
pub struct ConfigOrchestrator {
    settings: CachedJson<Settings>,
    tokens: CachedJson<ApiTokens>,
}

impl ConfigOrchestrator {
    pub fn new(paths: &DataPaths) -> Self {
        Self {
            settings: CachedJson::new(paths.settings_path()),
            tokens: CachedJson::new(paths.api_path()),
        }
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        self.settings.load_with_cache()
    }

    pub fn tokens(&self) -> Result<ApiTokens, ConfigError> {
        self.tokens.load_with_cache()
    }

    pub fn update_settings<F, R>(&self, mutator: F) -> Result<R, ConfigError>
    where
        F: FnOnce(&mut Settings) -> R,
    {
        self.settings.mutate(mutator)
    }

    pub fn update_tokens<F, R>(&self, mutator: F) -> Result<R, ConfigError>
    where
        F: FnOnce(&mut ApiTokens) -> R,
    {
        self.tokens.mutate(mutator)
    }
}
