use thiserror::Error;

use crate::providers::configs::ProviderId;

/// Failures raised by a provider while talking to its vendor
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Configuration error for provider '{provider}': {message}")]
    Config { provider: String, message: String },

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request rejected ({status}): {message}")]
    RequestRejected { status: u16, message: String },

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// Only ever logged, tool arguments degrade to an empty map instead
    #[error("Could not parse arguments for tool call {id}: {source}")]
    ToolArgumentParse {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProviderError {
    pub fn config<M: Into<String>>(provider: ProviderId, message: M) -> Self {
        ProviderError::Config {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Map an http status and error body onto the taxonomy
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::AuthFailure(body),
            429 => ProviderError::RateLimited(body),
            code if code >= 500 => ProviderError::NetworkFailure(format!("Server error {}: {}", status, body)),
            code => ProviderError::RequestRejected {
                status: code,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::NetworkFailure(err.to_string())
        }
    }
}

/// Failures of a conversation turn
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("A reply is already in progress")]
    Busy,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            ProviderError::AuthFailure(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::FORBIDDEN, String::new()),
            ProviderError::AuthFailure(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::NetworkFailure(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_REQUEST, "nope".into()),
            ProviderError::RequestRejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_config_error_names_provider() {
        let err = ProviderError::config(ProviderId::OpenAi, "not configured");
        assert!(err.to_string().contains("openai"));
    }
}
