//! Error types for the chatrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all chatrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Chat backend errors ---
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Message delivery failed for {message_id}: {reason}")]
    DeliveryFailed { message_id: String, reason: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("Token signing failed: {0}")]
    TokenSigning(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool not configured: {0}")]
    NotConfigured(String),

    #[error("Tool request failed: {tool_name}: {reason}")]
    RequestFailed { tool_name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn chat_error_displays_correctly() {
        let err = Error::Chat(ChatError::DeliveryFailed {
            message_id: "msg-1".into(),
            reason: "connection reset".into(),
        });
        assert!(err.to_string().contains("msg-1"));
        assert!(err.to_string().contains("connection reset"));
    }
}
