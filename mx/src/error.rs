//! Proxy error taxonomy and HTTP status mapping

use thiserror::Error;

/// Everything a completion attempt can fail with
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unknown model provider prefix in '{0}'")]
    UnknownProvider(String),

    #[error("No API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cannot reach the local model server at {url}. Start it (e.g. `ollama serve`) and retry.")]
    LocalUnavailable { url: String },

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProxyError {
    /// HTTP status this error surfaces as
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownProvider(_) | Self::InvalidRequest(_) => 400,
            Self::MissingApiKey(_) => 401,
            Self::Upstream { status, .. } => *status,
            Self::LocalUnavailable { .. } | Self::Network(_) | Self::InvalidResponse(_) => 502,
        }
    }

    /// `{error: {message}}` body for the wire
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": { "message": self.to_string() } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::UnknownProvider("x/y".into()).status_code(), 400);
        assert_eq!(ProxyError::MissingApiKey("openrouter").status_code(), 401);
        assert_eq!(
            ProxyError::Upstream {
                status: 429,
                message: "slow down".into()
            }
            .status_code(),
            429
        );
        assert_eq!(
            ProxyError::LocalUnavailable {
                url: "http://localhost:11434".into()
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn test_local_unavailable_is_actionable() {
        let err = ProxyError::LocalUnavailable {
            url: "http://localhost:11434".into(),
        };
        let message = err.to_body()["error"]["message"].as_str().unwrap().to_string();
        assert!(message.contains("ollama serve"));
        assert!(message.contains("http://localhost:11434"));
    }
}
