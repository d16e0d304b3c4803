//! URL helpers shared by the provider clients.
//!
//! Provider base URLs come from user-editable files, so they are normalised
//! before endpoints are appended to avoid double slashes.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use soul_of_waifu::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.mistral.ai/v1"), "https://api.mistral.ai/v1");
/// assert_eq!(normalize_base_url("https://api.mistral.ai/v1///"), "https://api.mistral.ai/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Construct a complete API endpoint URL from a base URL and endpoint path
///
/// # Examples
///
/// ```
/// use soul_of_waifu::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://openrouter.ai/api/v1/", "/chat/completions"),
///     "https://openrouter.ai/api/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Base URL of a locally hosted OpenAI-compatible server.
pub fn local_server_base_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/v1")
}

/// Root URL of a locally hosted server (health checks live outside `/v1`).
pub fn local_server_root_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}
