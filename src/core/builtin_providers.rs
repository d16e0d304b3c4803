//! Built-in stateless provider configuration
//!
//! Endpoints, token keys and default models for the chat-completions
//! backends are embedded from `builtin_providers.toml` at build time.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::character::record::ConversationMethod;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// `api.json` key that may override `base_url`
    pub base_url_key: Option<String>,
    /// `api.json` key holding the bearer token; `None` for local servers
    pub token_key: Option<String>,
    pub default_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

static BUILTIN_PROVIDERS: LazyLock<Vec<BuiltinProvider>> = LazyLock::new(|| {
    const CONFIG_CONTENT: &str = include_str!("../builtin_providers.toml");

    let config: BuiltinProvidersConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_providers.toml");

    config.providers
});

/// Load built-in providers from the embedded configuration
pub fn load_builtin_providers() -> &'static [BuiltinProvider] {
    &BUILTIN_PROVIDERS
}

/// Find a built-in provider by ID (case-insensitive)
pub fn find_builtin_provider(id: &str) -> Option<&'static BuiltinProvider> {
    load_builtin_providers()
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}

/// Provider entry backing a stateless conversation method.
pub fn provider_for(method: ConversationMethod) -> Option<&'static BuiltinProvider> {
    if method.is_stateful() {
        return None;
    }
    find_builtin_provider(method.id())
}
