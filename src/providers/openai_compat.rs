//! Streaming client for chat-completions compatible backends.
//!
//! Mistral, OpenAI (or any compatible base URL), OpenRouter and a local
//! llama.cpp-style server all accept the same request and answer with a
//! server-sent event stream of content deltas.

use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::local_server::LocalServer;
use super::{
    channel_stream, format_api_error, ProviderAdapter, ProviderError, ReplyEvent, ReplyStream,
    TurnContext, TurnRequest,
};
use crate::character::record::ConversationMethod;
use crate::core::builtin_providers::provider_for;
use crate::core::config::{ApiTokens, ConfigurationError, Settings};
use crate::core::message::ContextMessage;
use crate::utils::auth::add_auth_headers;
use crate::utils::url::{construct_api_url, local_server_base_url};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ContextMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponseDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseChoice {
    delta: ChatResponseDelta,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatResponseChoice>,
}

type EventSender = mpsc::UnboundedSender<Result<ReplyEvent, ProviderError>>;

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Handles one `data:` payload; returns true once the stream is finished
/// or the consumer has gone away.
fn handle_data_payload(payload: &str, tx: &EventSender) -> bool {
    if payload == "[DONE]" {
        return true;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            let content = response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty());
            match content {
                Some(content) => tx.send(Ok(ReplyEvent::Delta(content))).is_err(),
                None => false,
            }
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return false;
            }
            let _ = tx.send(Err(ProviderError::Api {
                status: None,
                message: format_api_error(payload),
            }));
            true
        }
    }
}

fn process_sse_line(line: &str, tx: &EventSender) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx))
        .unwrap_or(false)
}

/// Adapter for every stateless backend.
pub struct OpenAiCompatibleAdapter {
    method: ConversationMethod,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    local_server: Option<Arc<LocalServer>>,
}

impl OpenAiCompatibleAdapter {
    /// Resolves endpoint, token and model for `method` from the builtin table,
    /// `api.json` and `settings.json`.
    pub fn from_config(
        method: ConversationMethod,
        client: reqwest::Client,
        settings: &Settings,
        tokens: &ApiTokens,
    ) -> Result<Self, ConfigurationError> {
        let provider = provider_for(method).ok_or_else(|| {
            ConfigurationError::Unsupported(format!("{method} is not a chat-completions backend"))
        })?;

        let api_key = match &provider.token_key {
            Some(key) => Some(tokens.require(key)?.to_string()),
            None => None,
        };

        let base_url = if method == ConversationMethod::LocalLlm {
            local_server_base_url(settings.main_settings.local_llm_port)
        } else {
            provider
                .base_url_key
                .as_deref()
                .and_then(|key| tokens.get(key))
                .unwrap_or(&provider.base_url)
                .to_string()
        };

        let model = if method == ConversationMethod::LocalLlm {
            settings
                .main_settings
                .local_llm_model
                .clone()
                .filter(|model| !model.trim().is_empty())
                .ok_or_else(|| ConfigurationError::MissingSetting("local_llm_model".to_string()))?
        } else {
            settings
                .model_override(method)
                .unwrap_or(&provider.default_model)
                .to_string()
        };

        Ok(Self {
            method,
            client,
            base_url,
            api_key,
            model,
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
            local_server: None,
        })
    }

    /// Keeps the local server alive for as long as the adapter is in use.
    pub fn with_local_server(mut self, server: Arc<LocalServer>) -> Self {
        self.local_server = Some(server);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn method(&self) -> ConversationMethod {
        self.method
    }

    async fn send(&self, request: TurnRequest<'_>) -> Result<ReplyStream, ProviderError> {
        let TurnContext::Messages(mut messages) = request.context else {
            return Err(ProviderError::Unsupported(
                "remote chat handles on a stateless backend",
            ));
        };
        messages.push(ContextMessage::user(request.user_message));

        let chat_url = construct_api_url(&self.base_url, "chat/completions");
        let body = serde_json::to_value(ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
        .map_err(|err| ProviderError::Protocol(err.to_string()))?;

        let http_request = add_auth_headers(
            self.client
                .post(&chat_url)
                .header("Content-Type", "application/json"),
            self.method,
            self.api_key.as_deref(),
        );

        debug!(
            provider = self.method.id(),
            model = %self.model,
            messages = messages.len(),
            "starting chat completion stream"
        );

        let response = http_request.json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ProviderError::Api {
                status: Some(status),
                message: format_api_error(&error_text),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let provider = self.method.id();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let chunk_bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(ProviderError::Http(err)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk_bytes);

                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                    let should_end = match std::str::from_utf8(&buffer[..newline_pos]) {
                        Ok(line) => process_sse_line(line.trim(), &tx),
                        Err(err) => {
                            warn!(provider, "invalid UTF-8 in stream: {err}");
                            false
                        }
                    };
                    buffer.drain(..=newline_pos);
                    if should_end {
                        return;
                    }
                }
            }

            if let Ok(line) = std::str::from_utf8(&buffer) {
                process_sse_line(line.trim(), &tx);
            }
        });

        Ok(channel_stream(rx))
    }
}
