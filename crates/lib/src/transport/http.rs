//! HTTP transport for the assistant server (reqwest, JSON bodies).

use super::protocol::ErrorBody;
use super::{
    ChatRequest, ChatResponse, CommandRequest, CommandResponse, HealthResponse, Transport,
    TransportError, SECRET_HEADER,
};
use crate::config::ServerConfig;
use crate::session::CommandKind;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the assistant server's HTTP API. The base URL comes from the config passed to each call.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("http transport: client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    async fn post<B, R>(&self, url: &str, secret: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        log::debug!("http transport: POST {}", url);
        let res = self
            .client
            .post(url)
            .header(SECRET_HEADER, secret)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(res).await
    }
}

/// `<base>/<path>`, with exactly one slash between them.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn read_json<R: DeserializeOwned + Send>(res: reqwest::Response) -> Result<R, TransportError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(TransportError::Server {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }
    res.json().await.map_err(map_reqwest_error)
}

/// The `detail` field of a JSON error body, or the raw body text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_connect() || e.is_timeout() {
        TransportError::Unreachable(e.to_string())
    } else if e.is_decode() {
        TransportError::Unknown(format!("invalid response from server: {}", e))
    } else {
        TransportError::Unknown(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange_chat(
        &self,
        config: &ServerConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, TransportError> {
        let url = endpoint(&config.base_url, "chat");
        self.post(&url, &config.secret, request).await
    }

    async fn exchange_command(
        &self,
        config: &ServerConfig,
        command: CommandKind,
        request: &CommandRequest,
    ) -> Result<CommandResponse, TransportError> {
        let url = endpoint(
            &config.base_url,
            &format!("assistant/{}", command.path_segment()),
        );
        self.post(&url, &config.secret, request).await
    }

    async fn health(&self, config: &ServerConfig) -> Result<HealthResponse, TransportError> {
        let url = endpoint(&config.base_url, "health");
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(res).await
    }
}
