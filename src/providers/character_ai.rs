//! Character AI client.
//!
//! Conversation history lives on the Character AI servers. Account and
//! character lookups plus chat history go over HTTPS; everything that
//! creates or changes turns goes over the `neo` websocket, which answers with
//! full-text snapshots of the turn being generated.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, OnceCell};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{
    channel_stream, format_api_error, ProviderAdapter, ProviderError, ReplyEvent, ReplyStream,
    TurnContext, TurnRequest,
};
use crate::character::record::{CharacterRecord, ConversationMethod};
use crate::core::ledger::RemoteMessage;
use crate::core::message::{Message, RemoteTurn};
use crate::utils::auth::add_auth_headers;

/// `api.json` key holding the Character AI token.
pub const TOKEN_KEY: &str = "character_ai_token";

const PLUS_URL: &str = "https://plus.character.ai";
const NEO_URL: &str = "https://neo.character.ai";
const WS_URL: &str = "wss://neo.character.ai/ws/";
const ORIGIN_ID: &str = "web-next";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Random version 4 UUID in its hyphenated form.
fn new_uuid() -> Result<String, ProviderError> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes)
        .map_err(|err| ProviderError::Protocol(format!("no randomness available: {err}")))?;
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct TurnKey {
    turn_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TurnAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_human: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    candidate_id: String,
    #[serde(default)]
    raw_content: String,
    #[serde(default)]
    is_final: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct Turn {
    turn_key: TurnKey,
    #[serde(default)]
    author: TurnAuthor,
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    primary_candidate_id: Option<String>,
}

impl Turn {
    fn is_human(&self) -> bool {
        self.author.is_human.unwrap_or(false)
    }

    fn primary_candidate(&self) -> Option<&Candidate> {
        self.primary_candidate_id
            .as_deref()
            .and_then(|primary| {
                self.candidates
                    .iter()
                    .find(|candidate| candidate.candidate_id == primary)
            })
            .or_else(|| self.candidates.last())
    }

    fn into_remote_message(self) -> Option<RemoteMessage> {
        let candidate = self.primary_candidate()?.clone();
        Some(RemoteMessage {
            is_user: self.is_human(),
            author_name: self.author.name,
            text: candidate.raw_content,
            remote: RemoteTurn {
                turn_id: self.turn_key.turn_id,
                candidate_id: candidate.candidate_id,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct TurnsPage {
    #[serde(default)]
    turns: Vec<Turn>,
    #[serde(default)]
    meta: Option<TurnsMeta>,
}

#[derive(Debug, Deserialize)]
struct TurnsMeta {
    #[serde(default)]
    next_token: Option<String>,
}

/// Interpretation of one websocket text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    /// A snapshot of the character's turn being generated.
    Reply {
        text: String,
        remote: RemoteTurn,
        is_final: bool,
    },
    /// Echo of a turn authored by the user.
    UserTurn,
    /// Acknowledgement of a command; carries the raw `command` name.
    Ack { command: String, body: Value },
    Error(String),
}

fn parse_frame(raw: &str) -> Result<Frame, ProviderError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ProviderError::Protocol(format!("invalid websocket frame: {err}")))?;
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match command.as_str() {
        "neo_error" => Ok(Frame::Error(format_api_error(raw))),
        "add_turn" | "update_turn" => {
            let turn: Turn = serde_json::from_value(value.get("turn").cloned().unwrap_or_default())
                .map_err(|err| ProviderError::Protocol(format!("invalid turn: {err}")))?;
            if turn.is_human() {
                return Ok(Frame::UserTurn);
            }
            let candidate = turn.candidates.first().ok_or_else(|| {
                ProviderError::Protocol("turn frame without candidates".to_string())
            })?;
            Ok(Frame::Reply {
                text: candidate.raw_content.clone(),
                is_final: candidate.is_final.unwrap_or(false),
                remote: RemoteTurn {
                    turn_id: turn.turn_key.turn_id.clone(),
                    candidate_id: candidate.candidate_id.clone(),
                },
            })
        }
        _ => Ok(Frame::Ack {
            command: command.clone(),
            body: value,
        }),
    }
}

/// Public profile of a character, used to create local records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CharacterInfo {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub avatar_file_name: Option<String>,
}

#[derive(Deserialize)]
struct CharacterInfoResponse {
    character: Option<CharacterInfo>,
    #[serde(default)]
    error: Option<String>,
}

/// Newly created chat plus the greeting the character opened it with.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub chat_id: String,
    pub greeting: Option<RemoteMessage>,
}

pub struct CharacterAiClient {
    http: reqwest::Client,
    token: String,
    account_id: OnceCell<String>,
}

impl CharacterAiClient {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            account_id: OnceCell::new(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        add_auth_headers(
            self.http.get(url),
            ConversationMethod::CharacterAi,
            Some(&self.token),
        )
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        add_auth_headers(
            self.http.post(url),
            ConversationMethod::CharacterAi,
            Some(&self.token),
        )
    }

    async fn json_or_error(response: reqwest::Response) -> Result<Value, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message: format_api_error(&body),
            });
        }
        Ok(response.json().await?)
    }

    /// Numeric account id of the token owner, fetched once.
    pub async fn account_id(&self) -> Result<&str, ProviderError> {
        self.account_id
            .get_or_try_init(|| async {
                let response = self.get(&format!("{PLUS_URL}/chat/user/")).send().await?;
                let body = Self::json_or_error(response).await?;
                body.pointer("/user/user/id")
                    .and_then(|id| match id {
                        Value::Number(n) => Some(n.to_string()),
                        Value::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        ProviderError::Protocol("account response without user id".to_string())
                    })
            })
            .await
            .map(String::as_str)
    }

    pub async fn character_info(&self, character_id: &str) -> Result<CharacterInfo, ProviderError> {
        let response = self
            .post(&format!("{PLUS_URL}/chat/character/info/"))
            .json(&json!({ "external_id": character_id }))
            .send()
            .await?;
        let body = Self::json_or_error(response).await?;
        let parsed: CharacterInfoResponse = serde_json::from_value(body)
            .map_err(|err| ProviderError::Protocol(format!("invalid character info: {err}")))?;
        match parsed.character {
            Some(info) => Ok(info),
            None => Err(ProviderError::Api {
                status: None,
                message: parsed
                    .error
                    .unwrap_or_else(|| format!("character {character_id} not found")),
            }),
        }
    }

    /// Whole chat in chronological order, following pagination.
    pub async fn fetch_turns(&self, chat_id: &str) -> Result<Vec<RemoteMessage>, ProviderError> {
        let mut turns: Vec<Turn> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut url = format!("{NEO_URL}/turns/{chat_id}/");
            if let Some(token) = &next_token {
                url.push_str("?next_token=");
                url.push_str(token);
            }
            let response = self.get(&url).send().await?;
            let body = Self::json_or_error(response).await?;
            let page: TurnsPage = serde_json::from_value(body)
                .map_err(|err| ProviderError::Protocol(format!("invalid turns page: {err}")))?;

            let page_len = page.turns.len();
            turns.extend(page.turns);
            next_token = page
                .meta
                .and_then(|meta| meta.next_token)
                .filter(|token| !token.is_empty());
            if next_token.is_none() || page_len == 0 {
                break;
            }
        }

        debug!(chat_id, turns = turns.len(), "fetched remote chat");
        // The service lists newest first.
        Ok(turns
            .into_iter()
            .rev()
            .filter_map(Turn::into_remote_message)
            .collect())
    }

    async fn connect(&self) -> Result<Socket, ProviderError> {
        let mut request = WS_URL.into_client_request()?;
        let cookie = HeaderValue::from_str(&format!("HTTP_AUTHORIZATION=\"Token {}\"", self.token))
            .map_err(|err| ProviderError::Protocol(format!("invalid token: {err}")))?;
        request.headers_mut().insert("Cookie", cookie);
        let (socket, _) = connect_async(request).await?;
        Ok(socket)
    }

    fn envelope(command: &str, payload: Value) -> Result<Value, ProviderError> {
        Ok(json!({
            "command": command,
            "request_id": new_uuid()?,
            "payload": payload,
            "origin_id": ORIGIN_ID,
        }))
    }

    async fn open_with(&self, envelope: Value) -> Result<Socket, ProviderError> {
        let mut socket = self.connect().await?;
        socket.send(WsMessage::text(envelope.to_string())).await?;
        Ok(socket)
    }

    /// Sends one command and waits for the frame named `until`.
    async fn run_command(&self, envelope: Value, until: &str) -> Result<Value, ProviderError> {
        let mut socket = self.open_with(envelope).await?;
        let result = loop {
            let Some(message) = socket.next().await else {
                break Err(ProviderError::Protocol(format!(
                    "connection closed before {until}"
                )));
            };
            let WsMessage::Text(raw) = message? else {
                continue;
            };
            match parse_frame(raw.as_str())? {
                Frame::Error(message) => {
                    break Err(ProviderError::Api {
                        status: None,
                        message,
                    })
                }
                Frame::Ack { command, body } if command == until => break Ok(body),
                Frame::Reply { is_final: true, .. } if until == "update_turn" => {
                    break Ok(Value::Null)
                }
                _ => {}
            }
        };
        let _ = socket.close(None).await;
        result
    }

    /// Streams the character's answer for a command that produces a turn.
    async fn stream_turn(&self, envelope: Value) -> Result<ReplyStream, ProviderError> {
        let mut socket = self.open_with(envelope).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                let raw = match message {
                    Ok(WsMessage::Text(raw)) => raw,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        let _ = tx.send(Err(ProviderError::from(err)));
                        break;
                    }
                };
                match parse_frame(raw.as_str()) {
                    Ok(Frame::Reply {
                        text,
                        remote,
                        is_final,
                    }) => {
                        let event = ReplyEvent::Snapshot {
                            text,
                            remote: Some(remote),
                        };
                        if tx.send(Ok(event)).is_err() || is_final {
                            break;
                        }
                    }
                    Ok(Frame::Error(message)) => {
                        let _ = tx.send(Err(ProviderError::Api {
                            status: None,
                            message,
                        }));
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("skipping Character AI frame: {err}");
                    }
                }
            }
            let _ = socket.close(None).await;
        });

        Ok(channel_stream(rx))
    }

    pub async fn create_chat(&self, character_id: &str) -> Result<NewChat, ProviderError> {
        let account_id = self.account_id().await?.to_string();
        let envelope = Self::envelope(
            "create_chat",
            json!({
                "chat": {
                    "chat_id": new_uuid()?,
                    "creator_id": account_id,
                    "visibility": "VISIBILITY_PRIVATE",
                    "character_id": character_id,
                    "type": "TYPE_ONE_ON_ONE",
                },
                "with_greeting": true,
            }),
        )?;

        let mut socket = self.open_with(envelope).await?;
        let mut chat_id: Option<String> = None;
        let mut greeting: Option<RemoteMessage> = None;

        while let Some(message) = socket.next().await {
            let WsMessage::Text(raw) = message? else {
                continue;
            };
            match parse_frame(raw.as_str())? {
                Frame::Error(message) => {
                    return Err(ProviderError::Api {
                        status: None,
                        message,
                    })
                }
                Frame::Ack { command, body } if command == "create_chat_response" => {
                    chat_id = body
                        .pointer("/chat/chat_id")
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                }
                Frame::Reply {
                    text,
                    remote,
                    is_final,
                } => {
                    greeting = Some(RemoteMessage {
                        author_name: String::new(),
                        is_user: false,
                        text,
                        remote,
                    });
                    if is_final {
                        break;
                    }
                }
                _ => {}
            }
        }
        let _ = socket.close(None).await;

        let chat_id = chat_id
            .ok_or_else(|| ProviderError::Protocol("chat was not created".to_string()))?;
        debug!(character_id, chat_id = %chat_id, "created remote chat");
        Ok(NewChat { chat_id, greeting })
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        character_id: &str,
        user_name: &str,
        text: &str,
    ) -> Result<ReplyStream, ProviderError> {
        let account_id = self.account_id().await?.to_string();
        let candidate_id = new_uuid()?;
        let envelope = Self::envelope(
            "create_and_generate_turn",
            json!({
                "num_candidates": 1,
                "tts_enabled": false,
                "selected_language": "",
                "character_id": character_id,
                "user_name": user_name,
                "turn": {
                    "turn_key": { "turn_id": new_uuid()?, "chat_id": chat_id },
                    "author": { "author_id": account_id, "is_human": true, "name": user_name },
                    "candidates": [{ "candidate_id": candidate_id, "raw_content": text }],
                    "primary_candidate_id": candidate_id,
                },
                "previous_annotations": {},
            }),
        )?;
        self.stream_turn(envelope).await
    }

    pub async fn edit_turn(
        &self,
        chat_id: &str,
        turn: &RemoteTurn,
        new_text: &str,
    ) -> Result<(), ProviderError> {
        let envelope = Self::envelope(
            "edit_turn_candidate",
            json!({
                "turn_key": { "chat_id": chat_id, "turn_id": turn.turn_id },
                "current_candidate_id": turn.candidate_id,
                "new_candidate_raw_content": new_text,
            }),
        )?;
        self.run_command(envelope, "update_turn").await?;
        Ok(())
    }

    pub async fn remove_turns(&self, chat_id: &str, turn_ids: &[String]) -> Result<(), ProviderError> {
        if turn_ids.is_empty() {
            return Ok(());
        }
        let envelope = Self::envelope(
            "remove_turns",
            json!({ "chat_id": chat_id, "turn_ids": turn_ids }),
        )?;
        self.run_command(envelope, "remove_turns_response").await?;
        Ok(())
    }

    pub async fn regenerate(
        &self,
        chat_id: &str,
        character_id: &str,
        turn: &RemoteTurn,
    ) -> Result<ReplyStream, ProviderError> {
        let envelope = Self::envelope(
            "generate_turn_candidate",
            json!({
                "tts_enabled": false,
                "selected_language": "",
                "character_id": character_id,
                "turn_key": { "turn_id": turn.turn_id, "chat_id": chat_id },
            }),
        )?;
        self.stream_turn(envelope).await
    }
}

fn chat_handle(record: &CharacterRecord) -> Result<(&str, &str), ProviderError> {
    match (record.chat_id.as_deref(), record.character_id.as_deref()) {
        (Some(chat_id), Some(character_id)) => Ok((chat_id, character_id)),
        _ => Err(ProviderError::Protocol(format!(
            "{} has no Character AI chat",
            record.character_name
        ))),
    }
}

/// Stateful adapter: history is kept server-side and re-fetched after
/// every turn.
pub struct CharacterAiAdapter {
    client: CharacterAiClient,
}

impl CharacterAiAdapter {
    pub fn new(client: CharacterAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for CharacterAiAdapter {
    fn method(&self) -> ConversationMethod {
        ConversationMethod::CharacterAi
    }

    async fn send(&self, request: TurnRequest<'_>) -> Result<ReplyStream, ProviderError> {
        let TurnContext::Remote {
            chat_id,
            character_id,
        } = request.context
        else {
            return Err(ProviderError::Unsupported(
                "explicit context on a stateful backend",
            ));
        };
        self.client
            .send_message(&chat_id, &character_id, request.user_name, request.user_message)
            .await
    }

    async fn fetch_chat(
        &self,
        record: &CharacterRecord,
    ) -> Result<Option<Vec<RemoteMessage>>, ProviderError> {
        let (chat_id, _) = chat_handle(record)?;
        let mut messages = self.client.fetch_turns(chat_id).await?;
        for message in messages.iter_mut().filter(|m| !m.is_user) {
            if message.author_name.is_empty() {
                message.author_name = record.character_name.clone();
            }
        }
        Ok(Some(messages))
    }

    async fn edit_remote(
        &self,
        record: &CharacterRecord,
        message: &Message,
        new_text: &str,
    ) -> Result<(), ProviderError> {
        let (chat_id, _) = chat_handle(record)?;
        let turn = message.remote().ok_or_else(|| {
            ProviderError::Protocol("message has no Character AI turn".to_string())
        })?;
        self.client.edit_turn(chat_id, &turn, new_text).await
    }

    async fn delete_remote(
        &self,
        record: &CharacterRecord,
        turn_ids: &[String],
    ) -> Result<(), ProviderError> {
        let (chat_id, _) = chat_handle(record)?;
        self.client.remove_turns(chat_id, turn_ids).await
    }

    async fn regenerate_remote(
        &self,
        record: &CharacterRecord,
        turn: &RemoteTurn,
    ) -> Result<ReplyStream, ProviderError> {
        let (chat_id, character_id) = chat_handle(record)?;
        self.client.regenerate(chat_id, character_id, turn).await
    }
}
