//! Moderation service client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("moderation request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("moderation service returned status {0}")]
    Status(u16),

    #[error("malformed moderation response: {0}")]
    Malformed(String),

    #[error("moderation circuit is open")]
    CircuitOpen,

    #[error("moderation timed out after {0:?}")]
    Timeout(Duration),
}

impl ModerationError {
    /// Failures worth another attempt: transport errors, 5xx and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            ModerationError::Transport(_) => true,
            ModerationError::Status(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Verdict returned by the moderation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    pub is_profane: bool,
    #[serde(default)]
    pub matches: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    text: &'a str,
}

#[async_trait]
pub trait ModerationClient: Send + Sync {
    /// One call to the moderation service, no retries.
    async fn check(&self, text: &str) -> Result<ModerationVerdict, ModerationError>;
}

/// POSTs `{"text": ...}` and reads `{"isProfane": bool, "matches": [..]}`.
#[derive(Debug, Clone)]
pub struct HttpModerationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpModerationClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ModerationClient for HttpModerationClient {
    async fn check(&self, text: &str) -> Result<ModerationVerdict, ModerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ModerationRequest { text })
            .send()
            .await
            .map_err(ModerationError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModerationError::Status(status.as_u16()));
        }

        response
            .json::<ModerationVerdict>()
            .await
            .map_err(|e| ModerationError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_wire_names() {
        let verdict: ModerationVerdict =
            serde_json::from_str(r#"{"isProfane":true,"matches":["darn"]}"#).unwrap();
        assert!(verdict.is_profane);
        assert_eq!(verdict.matches, vec!["darn".to_string()]);

        let clean: ModerationVerdict = serde_json::from_str(r#"{"isProfane":false}"#).unwrap();
        assert!(clean.matches.is_empty());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ModerationError::Status(503).is_transient());
        assert!(ModerationError::Status(429).is_transient());
        assert!(!ModerationError::Status(400).is_transient());
        assert!(!ModerationError::Malformed("x".into()).is_transient());
        assert!(!ModerationError::CircuitOpen.is_transient());
    }
}
