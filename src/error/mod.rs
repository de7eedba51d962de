//! Error types for delve.

use thiserror::Error;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    ToolExecution,
    ToolServer,
    Engine,
    Unknown,
}

/// Primary error type for all delve operations.
#[derive(Error, Debug)]
pub enum DelveError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Model requested unregistered tool '{0}'")]
    ToolNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Access denied: {0} is outside the workspace")]
    AccessDenied(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Tool server '{server}': {message}")]
    ToolServer { server: String, message: String },

    #[error("Conversation exceeded the maximum of {0} turns")]
    MaxTurnsExceeded(usize),

    #[error("Cancelled")]
    Cancelled,
}

impl DelveError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ToolExecution { .. } | Self::AccessDenied(_) | Self::InvalidArgument(_) => {
                ErrorCategory::ToolExecution
            }
            Self::ToolServer { .. } => ErrorCategory::ToolServer,
            Self::ToolNotFound(_) | Self::MaxTurnsExceeded(_) | Self::Cancelled => {
                ErrorCategory::Engine
            }
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DelveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_drives_category() {
        assert_eq!(DelveError::api(401, "no").category(), ErrorCategory::Authentication);
        assert_eq!(DelveError::api(429, "slow").category(), ErrorCategory::RateLimit);
        assert_eq!(DelveError::api(503, "down").category(), ErrorCategory::Server);
        assert_eq!(DelveError::api(400, "bad").category(), ErrorCategory::Api);
    }

    #[test]
    fn engine_errors_are_never_retryable() {
        assert!(!DelveError::ToolNotFound("x".into()).is_retryable());
        assert!(!DelveError::MaxTurnsExceeded(3).is_retryable());
        assert!(!DelveError::Cancelled.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(DelveError::Timeout(10).is_retryable());
        assert!(DelveError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(DelveError::api(500, "boom").is_retryable());
    }

    #[test]
    fn access_denied_message_names_path() {
        let err = DelveError::AccessDenied("../etc/passwd".into());
        assert_eq!(
            err.to_string(),
            "Access denied: ../etc/passwd is outside the workspace"
        );
    }
}
