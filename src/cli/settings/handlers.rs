//! Handlers for the individual configuration keys.

use crate::cli::settings::error::SettingError;
use crate::cli::settings::SettingHandler;
use crate::core::config::data::{
    Config, DEFAULT_DISPLAY_NAME, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE,
};
use crate::core::config::printing::mask_secret;

/// Handler for a free-text setting stored as a plain `String`.
pub struct TextHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    write: fn(&mut Config) -> &mut String,
    default: &'static str,
    secret: bool,
}

impl SettingHandler for TextHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let value = args.join(" ").trim().to_string();
        if value.is_empty() {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        }

        let shown = if self.secret {
            mask_secret(&value)
        } else {
            truncate_with_ellipsis(&value, 50)
        };
        *(self.write)(config) = value;
        Ok(format!("✅ Set {} to: {shown}", self.key))
    }

    fn unset(&self, config: &mut Config) -> String {
        *(self.write)(config) = self.default.to_string();
        if self.default.is_empty() {
            format!("✅ Unset {}", self.key)
        } else {
            format!("✅ Unset {} (will use default)", self.key)
        }
    }
}

pub fn api_key_handler() -> TextHandler {
    TextHandler {
        key: "api-key",
        hint: "To set the API key, provide the key from the Azure portal:",
        example: "azchat set api-key 0123456789abcdef",
        write: |config| &mut config.api_key,
        default: "",
        secret: true,
    }
}

pub fn endpoint_handler() -> TextHandler {
    TextHandler {
        key: "endpoint",
        hint: "To set the endpoint, provide the resource URL:",
        example: "azchat set endpoint https://my-resource.openai.azure.com/",
        write: |config| &mut config.endpoint,
        default: "",
        secret: false,
    }
}

pub fn deployment_handler() -> TextHandler {
    TextHandler {
        key: "deployment",
        hint: "To set the deployment, provide its name:",
        example: "azchat set deployment gpt-4o",
        write: |config| &mut config.deployment,
        default: "",
        secret: false,
    }
}

pub fn system_prompt_handler() -> TextHandler {
    TextHandler {
        key: "system-prompt",
        hint: "To set the system prompt, provide the instruction text:",
        example: "azchat set system-prompt \"You answer billing questions.\"",
        write: |config| &mut config.system_prompt,
        default: DEFAULT_SYSTEM_PROMPT,
        secret: false,
    }
}

pub fn display_name_handler() -> TextHandler {
    TextHandler {
        key: "display-name",
        hint: "To set the assistant's display name, provide the name:",
        example: "azchat set display-name Helpdesk",
        write: |config| &mut config.display_name,
        default: DEFAULT_DISPLAY_NAME,
        secret: false,
    }
}

/// Handler for the `temperature` setting.
pub struct TemperatureHandler;

impl SettingHandler for TemperatureHandler {
    fn key(&self) -> &'static str {
        "temperature"
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let Some(raw) = args.first() else {
            return Err(SettingError::MissingArgs {
                hint: "To set the temperature, provide a number between 0 and 2:",
                example: "azchat set temperature 0.7",
            });
        };
        let value = parse_temperature(raw)?;
        config.temperature = value;
        Ok(format!("✅ Set temperature to: {value}"))
    }

    fn unset(&self, config: &mut Config) -> String {
        config.temperature = DEFAULT_TEMPERATURE;
        "✅ Unset temperature (will use default)".to_string()
    }
}

pub fn parse_temperature(input: &str) -> Result<f64, SettingError> {
    match input.trim().parse::<f64>() {
        Ok(value) if (0.0..=2.0).contains(&value) => Ok(value),
        _ => Err(SettingError::InvalidTemperature(input.to_string())),
    }
}

/// Truncate a string to `max_chars` characters, appending "..." if truncated.
fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
