//! Transport gateway: one request/response exchange with the assistant server.
//!
//! The session only talks to the `Transport` trait; `HttpTransport` is the reqwest implementation.
//! Retries and timeouts belong here, never in the session.

mod http;
mod protocol;

pub use http::{HttpTransport, DEFAULT_TIMEOUT};
pub use protocol::{
    ChatRequest, ChatResponse, CommandRequest, CommandResponse, HealthResponse, SECRET_HEADER,
};

use crate::config::ServerConfig;
use crate::session::CommandKind;
use async_trait::async_trait;

/// Failure of a single exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, timeout.
    #[error("server unreachable: {0}")]
    Unreachable(String),
    /// Non-2xx response.
    #[error("server returned {status}: {detail}")]
    Server { status: u16, detail: String },
    #[error("{0}")]
    Unknown(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST /chat with the secret header.
    async fn exchange_chat(
        &self,
        config: &ServerConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, TransportError>;

    /// POST /assistant/{command} with the secret header.
    async fn exchange_command(
        &self,
        config: &ServerConfig,
        command: CommandKind,
        request: &CommandRequest,
    ) -> Result<CommandResponse, TransportError>;

    /// GET /health. Default returns error.
    async fn health(&self, _config: &ServerConfig) -> Result<HealthResponse, TransportError> {
        Err(TransportError::Unknown("health check not supported".to_string()))
    }
}
