//! Authentication utilities for API requests
//!
//! This module adds provider-specific authentication headers to HTTP
//! requests.

use crate::character::record::ConversationMethod;

const APP_TITLE: &str = "Soul of Waifu";

/// Add provider-specific authentication headers to an HTTP request
///
/// - Character AI: `Authorization: Token <key>`
/// - OpenRouter: bearer token plus the `X-Title` attribution header
/// - Local LLM: bearer token only when one is configured
/// - All others: `Authorization: Bearer <key>`
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    method: ConversationMethod,
    api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    let Some(api_key) = api_key.filter(|key| !key.is_empty()) else {
        return request;
    };

    match method {
        ConversationMethod::CharacterAi => {
            request.header("Authorization", format!("Token {api_key}"))
        }
        ConversationMethod::OpenRouter => request
            .header("Authorization", format!("Bearer {api_key}"))
            .header("X-Title", APP_TITLE),
        _ => request.header("Authorization", format!("Bearer {api_key}")),
    }
}
