//! LLM collaborator errors.

use std::io;
use thiserror::Error;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("failed to spawn LLM bridge: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("failed to write to LLM bridge: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("failed to deserialize response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    #[error("LLM request timed out after {0} seconds")]
    Timeout(u64),

    #[error("LLM bridge exited unexpectedly")]
    ChannelClosed,

    #[error("LLM error: {message} (code: {code})")]
    Remote { code: String, message: String },

    #[error("LLM response is not a semantic analysis: {0}")]
    InvalidResponse(String),

    #[error("LLM bridge is not configured")]
    NotConfigured,
}

impl LlmError {
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ChannelClosed)
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for LlmError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
