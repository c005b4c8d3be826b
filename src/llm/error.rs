use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Rate limit exceeded: retry after {retry_after:?}s")]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Language model call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<LlmError>,
    },
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimitExceeded { .. }
            | LlmError::NetworkError(_)
            | LlmError::Timeout
            | LlmError::StreamError(_)
            | LlmError::InvalidResponse(_) => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::RateLimitExceeded { retry_after: None }.is_retryable());
        assert!(LlmError::ApiError {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!LlmError::ApiError {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!LlmError::AuthenticationError("nope".into()).is_retryable());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = LlmError::RetriesExhausted {
            attempts: 3,
            last_error: Box::new(LlmError::Timeout),
        };
        assert_eq!(
            err.to_string(),
            "Language model call failed after 3 attempts: Timeout"
        );
    }
}
