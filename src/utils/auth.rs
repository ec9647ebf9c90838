//! Request headers shared by every call to the chat API.

use crate::core::config::ChatSettings;

/// Attach the bearer credential and the client identification headers.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    api_key: &str,
    settings: &ChatSettings,
) -> reqwest::RequestBuilder {
    request
        .header("Authorization", format!("Bearer {api_key}"))
        .header("HTTP-Referer", settings.referer.as_str())
        .header("X-Title", settings.title.as_str())
}
