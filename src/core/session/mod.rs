//! The open conversation with one character.
//!
//! A [`Session`] owns everything a turn needs: the store holding the
//! character's ledger, the provider adapter chosen for its conversation
//! method, the optional side effects and the sink that renders progress.
//! Only one turn runs at a time; input is disabled for its duration and
//! re-enabled however it ends.
//!
//! Streamed updates go to the sink only. The ledger changes once per reply,
//! after the stream is exhausted, and a failure part-way through a turn
//! leaves whatever was already persisted in place.

use futures_util::StreamExt;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::character::record::CharacterRecord;
use crate::core::config::{
    ApiTokens, ConfigError, ConfigOrchestrator, ConfigurationError, DataPaths, Settings,
};
use crate::core::effects::{Effects, SessionSink, SpeechRecognizer, MODEL_LANGUAGE};
use crate::core::emotion::Emotion;
use crate::core::ledger::{LedgerError, Truncation};
use crate::core::message::{ContextMessage, Message, MessageId, RemoteTurn};
use crate::core::prompt::{build_context, build_system_prompt, HISTORY_WINDOW};
use crate::core::store::{CharacterStore, StoreError};
use crate::core::substitution::{clean_for_speech, substitute_placeholders, Names};
use crate::providers::{
    select_adapter, OfflineAdapter, ProviderAdapter, ProviderError, ReplyEvent, ReplyStream,
    TurnContext, TurnRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingResponse,
    Translating,
    DetectingEmotion,
    Synthesizing,
}

#[derive(Debug)]
pub enum SessionError {
    /// A turn is already in flight.
    Busy,

    /// The stream was cancelled before it finished.
    Cancelled,

    /// Nothing in the ledger can be regenerated.
    NothingToRegenerate,

    Store(StoreError),
    Provider(ProviderError),
    Configuration(ConfigurationError),
    Config(ConfigError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Busy => write!(f, "A reply is still being generated"),
            SessionError::Cancelled => write!(f, "Reply cancelled"),
            SessionError::NothingToRegenerate => write!(f, "There is no reply to regenerate"),
            SessionError::Store(err) => write!(f, "{err}"),
            SessionError::Provider(err) => write!(f, "{err}"),
            SessionError::Configuration(err) => write!(f, "{err}"),
            SessionError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Store(err) => Some(err),
            SessionError::Provider(err) => Some(err),
            SessionError::Configuration(err) => Some(err),
            SessionError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Store(err)
    }
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(err) => SessionError::Configuration(err),
            other => SessionError::Provider(other),
        }
    }
}

impl From<ConfigurationError> for SessionError {
    fn from(err: ConfigurationError) -> Self {
        SessionError::Configuration(err)
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err)
    }
}

/// What a completed turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub user_message: Option<MessageId>,
    pub reply: MessageId,
    /// Reply as persisted, placeholders resolved.
    pub text: String,
    /// Reply as shown, after output translation.
    pub displayed: String,
    pub emotion: Option<Emotion>,
    pub audio: Option<PathBuf>,
}

pub struct Session {
    character_name: String,
    store: CharacterStore,
    settings: Settings,
    adapter: Box<dyn ProviderAdapter>,
    effects: Effects,
    state: SessionState,
    cancel: CancellationToken,
}

/// Opens a session for `character_name` using the configuration under
/// `paths`. Missing tokens or settings are reported before any request.
pub async fn open(paths: &DataPaths, character_name: &str) -> Result<Session, SessionError> {
    open_with(paths, character_name, true).await
}

/// Like [`open`], but stateless characters get no provider client and no
/// local LLM server. For operations that only rewrite history (edit,
/// delete, continue).
pub async fn open_for_history(
    paths: &DataPaths,
    character_name: &str,
) -> Result<Session, SessionError> {
    open_with(paths, character_name, false).await
}

async fn open_with(
    paths: &DataPaths,
    character_name: &str,
    generates: bool,
) -> Result<Session, SessionError> {
    let config = ConfigOrchestrator::new(paths);
    let settings = config.settings()?;
    let tokens: ApiTokens = config.tokens()?;
    let store = CharacterStore::new(paths.characters_path());
    let record = store.get(character_name)?;

    let method = record.conversation_method;
    let adapter: Box<dyn ProviderAdapter> = if !generates && !method.is_stateful() {
        Box::new(OfflineAdapter::new(method))
    } else {
        select_adapter(&record, &settings, &tokens).await?
    };
    let effects = Effects::from_config(&settings, &tokens, paths);
    info!(
        character = %record.character_name,
        method = record.conversation_method.id(),
        "session opened"
    );
    Ok(Session::new(
        record.character_name,
        store,
        settings,
        adapter,
        effects,
    ))
}

impl Session {
    pub fn new(
        character_name: impl Into<String>,
        store: CharacterStore,
        settings: Settings,
        adapter: Box<dyn ProviderAdapter>,
        effects: Effects,
    ) -> Self {
        Self {
            character_name: character_name.into(),
            store,
            settings,
            adapter,
            effects,
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    pub fn character_name(&self) -> &str {
        &self.character_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token that aborts an in-flight stream; cancelled on process exit.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn record(&self) -> Result<CharacterRecord, SessionError> {
        Ok(self.store.get(&self.character_name)?)
    }

    pub fn user_name(&self) -> &str {
        self.settings.user_name()
    }

    fn is_stateful(&self) -> bool {
        self.adapter.method().is_stateful()
    }

    fn begin(&mut self, sink: &mut dyn SessionSink) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        self.state = SessionState::AwaitingResponse;
        sink.set_input_enabled(false);
        Ok(())
    }

    fn finish<T>(
        &mut self,
        operation: &str,
        result: Result<T, SessionError>,
        sink: &mut dyn SessionSink,
    ) -> Result<T, SessionError> {
        self.state = SessionState::Idle;
        sink.set_input_enabled(true);
        if let Err(err) = &result {
            error!(character = %self.character_name, operation, error = %err, "turn abandoned");
            sink.notify_error(&err.to_string());
        }
        result
    }

    /// Runs one turn for the text the user submitted. Empty input does
    /// nothing and returns `Ok(None)`.
    pub async fn handle_user_message(
        &mut self,
        text: &str,
        sink: &mut dyn SessionSink,
    ) -> Result<Option<TurnOutcome>, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.begin(sink)?;
        let result = self.run_turn(text, sink).await;
        self.finish("send", result, sink).map(Some)
    }

    /// Listens for one utterance and runs a turn with it. A recognition
    /// failure is reported to the sink and nothing is appended.
    pub async fn handle_voice_input(
        &mut self,
        recognizer: &dyn SpeechRecognizer,
        sink: &mut dyn SessionSink,
    ) -> Result<Option<TurnOutcome>, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        match recognizer.listen().await {
            Ok(text) => self.handle_user_message(&text, sink).await,
            Err(err) => {
                warn!(
                    character = %self.character_name,
                    error = %err,
                    "speech recognition failed"
                );
                let err = SessionError::from(err);
                sink.notify_error(&err.to_string());
                Err(err)
            }
        }
    }

    async fn run_turn(
        &mut self,
        text: &str,
        sink: &mut dyn SessionSink,
    ) -> Result<TurnOutcome, SessionError> {
        let outgoing = self.translate_input(text).await;

        let user_name = self.user_name().to_string();
        let user_id = self
            .store
            .append(&self.character_name, &user_name, true, &outgoing)?;
        sink.display_message(&user_name, text, true);

        let record = self.record()?;
        let request = TurnRequest {
            user_name: &user_name,
            user_message: &outgoing,
            context: self.turn_context(&record, Some(user_id))?,
        };
        self.state = SessionState::AwaitingResponse;
        let stream = self.adapter.send(request).await?;

        let mut outcome = self.complete_reply(stream, sink).await?;
        outcome.user_message = self.user_message_before(user_id, outcome.reply)?;
        Ok(outcome)
    }

    /// The ID the user's message ended up with. Reconciling with a remote
    /// history replaces the local copy, so fall back to the newest user
    /// message preceding the reply.
    fn user_message_before(
        &self,
        appended: MessageId,
        reply: MessageId,
    ) -> Result<Option<MessageId>, SessionError> {
        let record = self.record()?;
        if record.chat_content.contains(appended) {
            return Ok(Some(appended));
        }
        Ok(record
            .chat_content
            .iter()
            .filter(|(id, message)| message.is_user && *id < reply)
            .map(|(id, _)| id)
            .last())
    }

    /// Input translation never blocks a turn; on failure the original text
    /// is sent.
    async fn translate_input(&mut self, text: &str) -> String {
        if self.effects.translator.is_none()
            || !self.settings.main_settings.translator_mode.translates_input()
        {
            return text.to_string();
        }
        self.state = SessionState::Translating;
        let Some(translator) = &self.effects.translator else {
            return text.to_string();
        };
        match translator.translate(text, MODEL_LANGUAGE).await {
            Ok(translated) => translated,
            Err(err) => {
                warn!(error = %err, "input translation failed; sending original text");
                text.to_string()
            }
        }
    }

    fn turn_context(
        &self,
        record: &CharacterRecord,
        pending: Option<MessageId>,
    ) -> Result<TurnContext, SessionError> {
        if self.is_stateful() {
            let chat_id = record
                .chat_id
                .clone()
                .ok_or_else(|| ConfigurationError::MissingSetting("chat_id".to_string()))?;
            let character_id = record
                .character_id
                .clone()
                .ok_or_else(|| ConfigurationError::MissingSetting("character_id".to_string()))?;
            return Ok(TurnContext::Remote {
                chat_id,
                character_id,
            });
        }

        let names = Names::new(self.user_name(), &record.character_name);
        let mut messages = vec![ContextMessage::system(build_system_prompt(
            record,
            names,
            &self.settings.user_data.user_description,
        ))];
        messages.extend(build_context(
            &record.chat_content,
            pending,
            HISTORY_WINDOW,
            names,
        ));
        Ok(TurnContext::Messages(messages))
    }

    /// Consumes the stream into the sink; returns the final raw text and
    /// the last correlation data seen.
    async fn consume(
        &self,
        mut stream: ReplyStream,
        sink: &mut dyn SessionSink,
    ) -> Result<(String, Option<RemoteTurn>), SessionError> {
        let mut reply = String::new();
        let mut remote: Option<RemoteTurn> = None;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Ok(ReplyEvent::Delta(delta))) => reply.push_str(&delta),
                Some(Ok(ReplyEvent::Snapshot { text, remote: turn })) => {
                    reply = text;
                    if turn.is_some() {
                        remote = turn;
                    }
                }
                Some(Err(err)) => return Err(err.into()),
            }
            sink.update_reply(&self.character_name, &reply);
            tokio::task::yield_now().await;
        }

        Ok((reply, remote))
    }

    async fn complete_reply(
        &mut self,
        stream: ReplyStream,
        sink: &mut dyn SessionSink,
    ) -> Result<TurnOutcome, SessionError> {
        let (raw, remote) = self.consume(stream, sink).await?;
        let names = Names::new(self.user_name(), &self.character_name);
        let text = substitute_placeholders(&raw, names);

        let reply = self.persist_reply(&text, remote).await?;
        sink.finish_reply(&self.character_name, &text);
        debug!(character = %self.character_name, message_id = %reply, "reply stored");

        let record = self.record()?;
        let emotion = self.detect_emotion(&record, &text, sink).await?;
        let displayed = self.translate_output(&text, sink).await?;
        let audio = self.speak(&record, &displayed, sink).await?;

        Ok(TurnOutcome {
            user_message: None,
            reply,
            text,
            displayed,
            emotion,
            audio,
        })
    }

    async fn persist_reply(
        &mut self,
        text: &str,
        remote: Option<RemoteTurn>,
    ) -> Result<MessageId, SessionError> {
        if self.is_stateful() {
            let record = self.record()?;
            if let Some(mut messages) = self.adapter.fetch_chat(&record).await? {
                let names = Names::new(self.user_name(), &self.character_name);
                for message in messages.iter_mut().filter(|message| !message.is_user) {
                    message.text = substitute_placeholders(&message.text, names);
                }
                self.store.reconcile_remote(&self.character_name, messages)?;
                let record = self.record()?;
                if let Some((id, _)) = record.chat_content.last() {
                    return Ok(id);
                }
            }
        }

        let mut message = Message::new(&self.character_name, false, text);
        if let Some(remote) = remote {
            message = message.with_remote(remote);
        }
        Ok(self.store.append_message(&self.character_name, message)?)
    }

    /// Classification failures keep the previous emotion.
    async fn detect_emotion(
        &mut self,
        record: &CharacterRecord,
        text: &str,
        sink: &mut dyn SessionSink,
    ) -> Result<Option<Emotion>, SessionError> {
        if !record.current_sow_system_mode.detects_emotion() || self.effects.classifier.is_none() {
            return Ok(None);
        }
        self.state = SessionState::DetectingEmotion;
        let Some(classifier) = &self.effects.classifier else {
            return Ok(None);
        };
        match classifier.classify(text).await {
            Ok(emotion) => {
                self.store.set_emotion(&self.character_name, emotion)?;
                sink.set_expression(&self.character_name, emotion);
                debug!(character = %self.character_name, %emotion, "emotion detected");
                Ok(Some(emotion))
            }
            Err(err) => {
                warn!(error = %err, "emotion detection failed; keeping previous emotion");
                Ok(None)
            }
        }
    }

    async fn translate_output(
        &mut self,
        text: &str,
        sink: &mut dyn SessionSink,
    ) -> Result<String, SessionError> {
        if self.effects.translator.is_none()
            || !self.settings.main_settings.translator_mode.translates_output()
        {
            return Ok(text.to_string());
        }
        self.state = SessionState::Translating;
        let Some(translator) = &self.effects.translator else {
            return Ok(text.to_string());
        };
        let translated = translator
            .translate(text, &self.settings.main_settings.target_language)
            .await?;
        if translated != text {
            sink.finish_reply(&self.character_name, &translated);
        }
        Ok(translated)
    }

    async fn speak(
        &mut self,
        record: &CharacterRecord,
        text: &str,
        sink: &mut dyn SessionSink,
    ) -> Result<Option<PathBuf>, SessionError> {
        if !record.voice.is_enabled() {
            return Ok(None);
        }
        if self.effects.speech.is_none() {
            debug!(voice = record.voice.backend_name(), "no synthesizer configured");
            return Ok(None);
        }
        let spoken = clean_for_speech(text);
        if spoken.is_empty() {
            return Ok(None);
        }
        self.state = SessionState::Synthesizing;
        let Some(speech) = &self.effects.speech else {
            return Ok(None);
        };
        match speech.synthesize(&spoken, &record.voice).await {
            Ok(path) => {
                sink.play_audio(&path);
                Ok(Some(path))
            }
            Err(ProviderError::Unsupported(what)) => {
                warn!(voice = record.voice.backend_name(), "speech skipped: {what}");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn message(record: &CharacterRecord, id: MessageId) -> Result<&Message, SessionError> {
        record.chat_content.get(id).ok_or_else(|| {
            SessionError::Store(StoreError::Ledger {
                character: record.character_name.clone(),
                source: LedgerError::MessageNotFound(id),
            })
        })
    }

    /// Replaces a message's text. Stateful providers are updated first and
    /// the ledger only changes once they accepted the edit.
    pub async fn edit_message(&mut self, id: MessageId, new_text: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        let record = self.record()?;
        let message = Self::message(&record, id)?;
        if self.is_stateful() {
            self.adapter.edit_remote(&record, message, new_text).await?;
        }
        self.store.edit(&self.character_name, id, new_text)?;
        info!(character = %self.character_name, message_id = %id, "message edited");
        Ok(())
    }

    /// Deletes messages by ID, all or nothing. At least one message must
    /// remain.
    pub async fn delete_messages(&mut self, ids: &[MessageId]) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        let record = self.record()?;
        record
            .chat_content
            .check_delete(ids)
            .map_err(|source| StoreError::Ledger {
                character: self.character_name.clone(),
                source,
            })?;
        let mut turn_ids = Vec::new();
        for id in ids {
            if let Some(turn_id) = Self::message(&record, *id)?.turn_id.clone() {
                turn_ids.push(turn_id);
            }
        }
        if self.is_stateful() && !turn_ids.is_empty() {
            self.adapter.delete_remote(&record, &turn_ids).await?;
        }
        self.store.delete(&self.character_name, ids)?;
        info!(character = %self.character_name, count = ids.len(), "messages deleted");
        Ok(())
    }

    /// Drops every message after `id` so the conversation continues from it.
    pub async fn continue_from(&mut self, id: MessageId) -> Result<Truncation, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        let record = self.record()?;
        let later = record.chat_content.after(id).map_err(|source| StoreError::Ledger {
            character: self.character_name.clone(),
            source,
        })?;
        let turn_ids: Vec<String> = later
            .iter()
            .filter_map(|(_, message)| message.turn_id.clone())
            .collect();
        if self.is_stateful() && !turn_ids.is_empty() {
            self.adapter.delete_remote(&record, &turn_ids).await?;
        }
        let truncation = self.store.truncate_after(&self.character_name, id)?;
        info!(
            character = %self.character_name,
            message_id = %id,
            removed = truncation.removed.len(),
            "conversation truncated"
        );
        Ok(truncation)
    }

    /// Produces a new reply to the latest user message, replacing the
    /// character's reply to it if there is one.
    pub async fn regenerate(
        &mut self,
        sink: &mut dyn SessionSink,
    ) -> Result<TurnOutcome, SessionError> {
        self.begin(sink)?;
        let result = self.run_regenerate(sink).await;
        self.finish("regenerate", result, sink)
    }

    async fn run_regenerate(
        &mut self,
        sink: &mut dyn SessionSink,
    ) -> Result<TurnOutcome, SessionError> {
        let record = self.record()?;
        let (last_id, last) = record
            .chat_content
            .last()
            .ok_or(SessionError::NothingToRegenerate)?;

        if self.is_stateful() {
            if last.is_user {
                return Err(SessionError::NothingToRegenerate);
            }
            let turn = last.remote().ok_or(SessionError::NothingToRegenerate)?;
            let stream = self.adapter.regenerate_remote(&record, &turn).await?;
            return self.complete_reply(stream, sink).await;
        }

        let (user_id, user_message) = record
            .chat_content
            .last_user()
            .ok_or(SessionError::NothingToRegenerate)?;
        let user_text = user_message.text.clone();
        if !last.is_user && last_id > user_id {
            self.store.delete(&self.character_name, &[last_id])?;
        }

        let record = self.record()?;
        let user_name = self.user_name().to_string();
        let request = TurnRequest {
            user_name: &user_name,
            user_message: &user_text,
            context: self.turn_context(&record, Some(user_id))?,
        };
        let stream = self.adapter.send(request).await?;
        let mut outcome = self.complete_reply(stream, sink).await?;
        outcome.user_message = Some(user_id);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests;
