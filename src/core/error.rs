//! Errors surfaced by a stream session.
//!
//! Malformed frames never appear here (they are skipped by the frame
//! interpreter) and neither does cancellation, which ends a session as
//! aborted rather than failed.

use std::error::Error as StdError;
use std::fmt;

/// Required settings that were blank when a session was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSettings {
    pub fields: Vec<&'static str>,
}

impl fmt::Display for MissingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Please configure your Azure OpenAI settings first (missing: {}).",
            self.fields.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Credential, endpoint or deployment is blank. No request was sent.
    Configuration(MissingSettings),
    /// Connection, DNS, TLS or mid-body read failure.
    Transport(String),
    /// Non-success HTTP status with the best message found in the body.
    Http { status: u16, message: String },
}

impl StreamError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, StreamError::Configuration(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Configuration(missing) => write!(f, "{missing}"),
            StreamError::Transport(message) => write!(f, "{message}"),
            StreamError::Http { message, .. } => write!(f, "{message}"),
        }
    }
}

impl StdError for StreamError {}

/// Best human-readable message from an error response body.
///
/// Looks for `error.message`, then a bare string `error`, then a top-level
/// `message`. Falls back to `API error <status>` when the body is empty, not
/// JSON, or carries none of those.
pub fn http_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body.trim())
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| format!("API error {status}"))
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}
