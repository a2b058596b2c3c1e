//! NDJSON envelopes exchanged with the LLM bridge process.
//!
//! One JSON object per line. Requests carry a unique id; the bridge echoes
//! it on the matching response so several requests can be in flight.

use serde::{Deserialize, Serialize};

pub mod methods {
    pub const CHAT: &str = "llm.chat";
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Parameters for `llm.chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub content: String,
}
