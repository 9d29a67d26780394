pub mod config;

pub use config::{ConfigError, ConfigStore, ConsoleConfig};

use once_cell::sync::Lazy;
use regex::Regex;

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(bearer )([\w\-\.=:/+]+)",
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
        r#"(?i)("(?:api_token|token|password)"\s*:\s*)("[^"]*")"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens_and_env_assignments() {
        let line = "Authorization: Bearer abc.def CRMBOT_API_TOKEN=s3cr3t other=value";
        let redacted = redact_sensitive(line);
        assert!(!redacted.contains("abc.def"));
        assert!(!redacted.contains("s3cr3t"));
        assert!(redacted.contains("other=value"));
    }

    #[test]
    fn redacts_json_token_fields() {
        let body = r#"{"api_token": "tok-123", "name": "Budget"}"#;
        let redacted = redact_sensitive(body);
        assert!(!redacted.contains("tok-123"));
        assert!(redacted.contains("Budget"));
    }
}
