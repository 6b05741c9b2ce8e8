use serde::{Deserialize, Serialize};

/// Endpoint of the troubleshooting service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TroubleshooterConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

impl TroubleshooterConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_strips_trailing_slash() {
        let config = TroubleshooterConfig::new("https://help.example.com/");
        assert_eq!(config.url, "https://help.example.com");
        assert_eq!(config.timeout_secs, 15);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: TroubleshooterConfig =
            serde_json::from_str(r#"{"url":"http://localhost:9000","token":"s3cret"}"#).unwrap();
        assert_eq!(config.token.as_deref(), Some("s3cret"));
        assert_eq!(config.timeout_secs, 15);
    }
}
