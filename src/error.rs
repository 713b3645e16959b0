//! Error types for the chat service

use thiserror::Error;

/// Result type alias for the chat service
pub type Result<T> = std::result::Result<T, ChatError>;

/// Failure raised by a tool executor.
///
/// Tool failures are recoverable: the response loop reports them to the model
/// as an `output-error` tool result instead of aborting the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("tool `{tool}` failed: {message}")]
pub struct ToolExecutionError {
    pub tool: String,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Main error type for the chat service
#[derive(Debug, Error)]
pub enum ChatError {
    /// Client exceeded its request quota for the current window
    #[error("Rate limit exceeded: {limit} requests per window")]
    RateLimitExceeded { limit: u32 },

    /// Request body missing or not in the UI message format
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(#[from] ToolExecutionError),

    /// Network or provider failure while talking to the model
    #[error("Model provider error: {message}")]
    ModelProvider { message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Error from the OpenAI-compatible API client
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::ModelProvider {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::RateLimitExceeded { limit: 10 };
        assert_eq!(err.to_string(), "Rate limit exceeded: 10 requests per window");

        let err = ChatError::malformed("messages must not be empty");
        assert_eq!(
            err.to_string(),
            "Malformed request: messages must not be empty"
        );
    }

    #[test]
    fn test_tool_error_converts() {
        let tool_err = ToolExecutionError::new("weather", "timeout");
        assert_eq!(tool_err.to_string(), "tool `weather` failed: timeout");
        let err: ChatError = tool_err.into();
        assert!(matches!(err, ChatError::ToolExecution(_)));
    }

    #[test]
    fn test_error_from_openai() {
        let openai_err = async_openai::error::OpenAIError::InvalidArgument("test".to_string());
        let err: ChatError = openai_err.into();
        assert!(matches!(err, ChatError::OpenAI(_)));
    }
}
