use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional and friendly customer support assistant. Provide clear, concise, and helpful responses. If you are unsure about something, be honest and offer to escalate the issue.";
pub const DEFAULT_DISPLAY_NAME: &str = "SupportAI";
pub const DEFAULT_TEMPERATURE: f64 = 1.0;

/// Connection and persona settings for the chat deployment.
///
/// A stream session clones the whole value when it is created, so edits made
/// while a response is streaming only apply to the next send.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_key: String,
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com/`
    pub endpoint: String,
    /// Deployment name the chat completions route is addressed to
    pub deployment: String,
    pub system_prompt: String,
    /// Sampling temperature; see [`Config::effective_temperature`]
    pub temperature: f64,
    /// Name shown for assistant replies
    pub display_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: String::new(),
            deployment: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
