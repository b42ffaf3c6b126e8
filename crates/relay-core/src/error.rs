// Error types for the orchestrator crate.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation turn.
#[derive(Debug, Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("tool execution error: {0}")]
    Tool(String),

    #[error("remote tool transport error: {0}")]
    RemoteTool(String),

    #[error("event emission error: {0}")]
    EventEmission(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("monthly token quota exhausted ({used}/{quota})")]
    QuotaExceeded { used: i64, quota: i64 },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn llm(msg: impl Into<String>) -> Self {
        Error::Llm(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn remote_tool(msg: impl Into<String>) -> Self {
        Error::RemoteTool(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}
