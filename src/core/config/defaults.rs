use crate::core::config::data::{Config, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE};
use crate::core::error::MissingSettings;

pub const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";

impl Config {
    /// Temperature clamped to `[0, 2]`; non-finite values fall back to 1.0.
    pub fn effective_temperature(&self) -> f64 {
        if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            DEFAULT_TEMPERATURE
        }
    }

    pub fn effective_system_prompt(&self) -> &str {
        if self.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            &self.system_prompt
        }
    }

    /// Required settings that are blank, in a stable order.
    pub fn missing_settings(&self) -> Option<MissingSettings> {
        let fields: Vec<&'static str> = [
            ("api-key", &self.api_key),
            ("endpoint", &self.endpoint),
            ("deployment", &self.deployment),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if fields.is_empty() {
            None
        } else {
            Some(MissingSettings { fields })
        }
    }

    pub fn is_configured(&self) -> bool {
        self.missing_settings().is_none()
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Non-blank values returned by `lookup` replace the stored ones.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets = [
            (ENV_API_KEY, &mut self.api_key),
            (ENV_ENDPOINT, &mut self.endpoint),
            (ENV_DEPLOYMENT, &mut self.deployment),
        ];
        for (name, field) in targets {
            if let Some(value) = lookup(name).filter(|value| !value.trim().is_empty()) {
                *field = value.trim().to_string();
            }
        }
    }
}
