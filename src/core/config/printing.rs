use crate::core::config::data::Config;

/// Keeps the last four characters of a credential visible.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return "(unset)".to_string();
    }
    if count <= 8 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}

pub fn or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "(unset)"
    } else {
        value
    }
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        for line in self.display_lines() {
            println!("{line}");
        }
    }

    /// Settings as `  key: value` lines with the credential masked.
    pub fn display_lines(&self) -> Vec<String> {
        vec![
            format!("  api-key: {}", mask_secret(&self.api_key)),
            format!("  endpoint: {}", or_unset(&self.endpoint)),
            format!("  deployment: {}", or_unset(&self.deployment)),
            format!("  temperature: {}", self.effective_temperature()),
            format!("  display-name: {}", or_unset(&self.display_name)),
            format!(
                "  system-prompt: {}",
                or_unset(&self.system_prompt.replace('\n', " "))
            ),
        ]
    }
}
