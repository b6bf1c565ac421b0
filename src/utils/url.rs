//! URL utilities for the chat completions route
//!
//! Endpoints are pasted from the Azure portal with or without a trailing
//! slash, so every URL is built from a normalized base.

use crate::core::constants::AZURE_API_VERSION;

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use azchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://res.openai.azure.com"), "https://res.openai.azure.com");
/// assert_eq!(normalize_base_url("https://res.openai.azure.com/"), "https://res.openai.azure.com");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Build the streaming chat completions URL for a deployment
///
/// # Examples
///
/// ```
/// use azchat::utils::url::construct_chat_url;
///
/// assert_eq!(
///     construct_chat_url("https://res.openai.azure.com/", "gpt-4o"),
///     "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-12-01-preview"
/// );
/// ```
pub fn construct_chat_url(endpoint: &str, deployment: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        normalize_base_url(endpoint),
        deployment.trim(),
        AZURE_API_VERSION
    )
}
