//! Assistant server wire types (chat, assistant commands, health).

use serde::{Deserialize, Serialize};

/// Header carrying the shared secret on every request.
pub const SECRET_HEADER: &str = "x-orty-secret";

/// `POST /chat` body: `{ "message", "conversation_id"? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Continue an existing server-side conversation; omitted to start a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// `POST /chat` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_id: String,
}

/// `POST /assistant/{command}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub utterance: String,
}

/// `POST /assistant/{command}` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub status: String,
    pub message: String,
}

/// `GET /health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub assistant: Option<String>,
}

/// Error body returned by the server on non-2xx: `{ "detail": ... }`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}
