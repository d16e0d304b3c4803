//! Conversational backends.
//!
//! Every backend is reached through [`ProviderAdapter`], selected once per
//! session from the character's [`ConversationMethod`]. Stateless adapters
//! receive the role-tagged context explicitly; the Character AI adapter
//! keeps history server-side and additionally reconciles, edits and deletes
//! remote turns.

pub mod character_ai;
pub mod local_server;
pub mod openai_compat;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use std::fmt;
use std::pin::Pin;
use tokio::sync::mpsc;

use crate::character::record::{CharacterRecord, ConversationMethod};
use crate::core::config::{ApiTokens, ConfigurationError, Settings};
use crate::core::ledger::RemoteMessage;
use crate::core::message::{ContextMessage, Message, RemoteTurn};

/// Failure talking to an external AI, TTS or translation service.
#[derive(Debug)]
pub enum ProviderError {
    /// Transport-level HTTP failure.
    Http(reqwest::Error),

    /// Websocket failure (Character AI).
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The service answered with an error status or error payload.
    Api {
        status: Option<u16>,
        message: String,
    },

    /// The service answered with something we could not interpret.
    Protocol(String),

    /// A bounded wait ran out.
    Timeout(String),

    /// A local helper process could not be started or died.
    Process(std::io::Error),

    /// The operation is not available for this backend.
    Unsupported(&'static str),

    /// Required configuration is missing.
    Configuration(ConfigurationError),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http(err) => write!(f, "HTTP error: {err}"),
            ProviderError::WebSocket(err) => write!(f, "Websocket error: {err}"),
            ProviderError::Api {
                status: Some(status),
                message,
            } => write!(f, "[{status}] {message}"),
            ProviderError::Api {
                status: None,
                message,
            } => write!(f, "{message}"),
            ProviderError::Protocol(msg) => write!(f, "Unexpected response: {msg}"),
            ProviderError::Timeout(msg) => write!(f, "Timed out: {msg}"),
            ProviderError::Process(err) => write!(f, "Process error: {err}"),
            ProviderError::Unsupported(what) => write!(f, "Not supported: {what}"),
            ProviderError::Configuration(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Http(err) => Some(err),
            ProviderError::WebSocket(err) => Some(err.as_ref()),
            ProviderError::Process(err) => Some(err),
            ProviderError::Configuration(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProviderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ProviderError::WebSocket(Box::new(err))
    }
}

impl From<ConfigurationError> for ProviderError {
    fn from(err: ConfigurationError) -> Self {
        ProviderError::Configuration(err)
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            ["message", "detail", "comment"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str().map(str::to_owned)))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// One-line description of an error body returned by a provider.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API error with empty body".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
            return format!("API error: {summary}");
        }
        return format!("API error: {json_value}");
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("API error: {collapsed}")
}

/// One item of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// Text to append to what was received so far.
    Delta(String),
    /// The complete reply text so far, replacing anything received before.
    Snapshot {
        text: String,
        remote: Option<RemoteTurn>,
    },
}

/// Lazy, finite, non-restartable sequence of reply events.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<ReplyEvent, ProviderError>> + Send>>;

/// Turns the receiving half of a channel fed by a spawned task into a
/// [`ReplyStream`]. Dropping the stream closes the channel, which stops the
/// producer at its next send.
pub(crate) fn channel_stream(
    rx: mpsc::UnboundedReceiver<Result<ReplyEvent, ProviderError>>,
) -> ReplyStream {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// What a provider needs to answer one user message.
pub enum TurnContext {
    /// System prompt plus windowed history for stateless providers.
    Messages(Vec<ContextMessage>),
    /// Handle to a conversation whose history lives server-side.
    Remote {
        chat_id: String,
        character_id: String,
    },
}

pub struct TurnRequest<'a> {
    pub user_name: &'a str,
    pub user_message: &'a str,
    pub context: TurnContext,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn method(&self) -> ConversationMethod;

    /// Starts generating a reply to `request.user_message`.
    async fn send(&self, request: TurnRequest<'_>) -> Result<ReplyStream, ProviderError>;

    /// Canonical conversation held by the provider, for stateful backends.
    async fn fetch_chat(
        &self,
        _record: &CharacterRecord,
    ) -> Result<Option<Vec<RemoteMessage>>, ProviderError> {
        Ok(None)
    }

    /// Mirrors a local edit on the provider side.
    async fn edit_remote(
        &self,
        _record: &CharacterRecord,
        _message: &Message,
        _new_text: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Removes turns on the provider side.
    async fn delete_remote(
        &self,
        _record: &CharacterRecord,
        _turn_ids: &[String],
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Asks a stateful provider for another candidate of `turn`.
    async fn regenerate_remote(
        &self,
        _record: &CharacterRecord,
        _turn: &RemoteTurn,
    ) -> Result<ReplyStream, ProviderError> {
        Err(ProviderError::Unsupported("remote regeneration"))
    }
}

/// Stand-in for a stateless backend when a session only rewrites history.
/// Stateless providers keep nothing server-side, so edits need no client.
pub struct OfflineAdapter {
    method: ConversationMethod,
}

impl OfflineAdapter {
    pub fn new(method: ConversationMethod) -> Self {
        Self { method }
    }
}

#[async_trait]
impl ProviderAdapter for OfflineAdapter {
    fn method(&self) -> ConversationMethod {
        self.method
    }

    async fn send(&self, _request: TurnRequest<'_>) -> Result<ReplyStream, ProviderError> {
        Err(ProviderError::Unsupported("generation in a history-only session"))
    }
}

/// Builds the adapter for `record`'s conversation method.
///
/// Missing tokens and settings are reported before any network call. For
/// the local backend this starts (or waits for) the local server.
pub async fn select_adapter(
    record: &CharacterRecord,
    settings: &Settings,
    tokens: &ApiTokens,
) -> Result<Box<dyn ProviderAdapter>, ProviderError> {
    let client = reqwest::Client::new();
    match record.conversation_method {
        ConversationMethod::CharacterAi => {
            let token = tokens.require(character_ai::TOKEN_KEY)?;
            Ok(Box::new(character_ai::CharacterAiAdapter::new(
                character_ai::CharacterAiClient::new(client, token),
            )))
        }
        ConversationMethod::LocalLlm => {
            let server = local_server::LocalServer::from_settings(settings)?;
            let server = server.ensure_ready(&client).await?;
            let adapter = openai_compat::OpenAiCompatibleAdapter::from_config(
                ConversationMethod::LocalLlm,
                client,
                settings,
                tokens,
            )?;
            Ok(Box::new(adapter.with_local_server(server)))
        }
        method => Ok(Box::new(openai_compat::OpenAiCompatibleAdapter::from_config(
            method, client, settings, tokens,
        )?)),
    }
}
