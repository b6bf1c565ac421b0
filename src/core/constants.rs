//! Shared constants used across the application

/// `api-version` query parameter sent with every chat completion request.
pub const AZURE_API_VERSION: &str = "2024-12-01-preview";

pub const MAX_TOKENS: u32 = 4096;
pub const TOP_P: f64 = 1.0;

/// Prefix that marks a data-bearing line of the event stream.
pub const DATA_PREFIX: &str = "data:";
/// Payload that ends the event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Grapheme budget for titles derived from the first user message.
/// The ellipsis is appended after the budget and is not counted in it.
pub const TITLE_MAX_GRAPHEMES: usize = 40;
pub const TITLE_ELLIPSIS: &str = "…";

/// Title a conversation gets back after it is cleared.
pub const CLEARED_CONVERSATION_TITLE: &str = "New Conversation";
