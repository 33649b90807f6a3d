//! Test doubles for the session runtime: a scripted transport and recording voice engines.

#![allow(dead_code)]

use async_trait::async_trait;
use orty::config::ServerConfig;
use orty::session::{CommandKind, Session};
use orty::transport::{
    ChatRequest, ChatResponse, CommandRequest, CommandResponse, Transport, TransportError,
};
use orty::voice::{VoiceCallback, VoiceCapture, VoiceError, VoiceOutput};
use orty::SessionHandle;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One exchange as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Chat {
        config: ServerConfig,
        request: ChatRequest,
    },
    Command {
        config: ServerConfig,
        command: CommandKind,
        request: CommandRequest,
    },
}

/// Transport that answers from queues of scripted results. When gated, each exchange
/// waits for `release()` before answering.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    chat: Mutex<VecDeque<Result<ChatResponse, TransportError>>>,
    command: Mutex<VecDeque<Result<CommandResponse, TransportError>>>,
    gate: Option<Semaphore>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn push_chat(&self, result: Result<ChatResponse, TransportError>) {
        self.chat.lock().unwrap().push_back(result);
    }

    pub fn push_chat_reply(&self, reply: &str, conversation_id: &str) {
        self.push_chat(Ok(ChatResponse {
            reply: reply.to_string(),
            conversation_id: conversation_id.to_string(),
        }));
    }

    pub fn push_command(&self, result: Result<CommandResponse, TransportError>) {
        self.command.lock().unwrap().push_back(result);
    }

    /// Let one gated exchange answer.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exchange_chat(
        &self,
        config: &ServerConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, TransportError> {
        self.calls.lock().unwrap().push(Call::Chat {
            config: config.clone(),
            request: request.clone(),
        });
        self.wait_gate().await;
        self.chat
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unknown("no scripted chat reply".into())))
    }

    async fn exchange_command(
        &self,
        config: &ServerConfig,
        command: CommandKind,
        request: &CommandRequest,
    ) -> Result<CommandResponse, TransportError> {
        self.calls.lock().unwrap().push(Call::Command {
            config: config.clone(),
            command,
            request: request.clone(),
        });
        self.wait_gate().await;
        self.command
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unknown("no scripted command reply".into())))
    }
}

/// Voice output that records what it was asked to say, optionally failing every time.
#[derive(Default)]
pub struct RecordingVoiceOutput {
    spoken: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingVoiceOutput {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl VoiceOutput for RecordingVoiceOutput {
    fn speak(&self, text: &str) -> Result<(), VoiceError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(VoiceError::Output("speaker unplugged".into()));
        }
        Ok(())
    }
}

/// Voice capture that immediately "hears" a fixed phrase.
pub struct ScriptedVoiceCapture {
    pub phrase: String,
    pub stops: Mutex<usize>,
}

impl ScriptedVoiceCapture {
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: phrase.to_string(),
            stops: Mutex::new(0),
        }
    }
}

impl VoiceCapture for ScriptedVoiceCapture {
    fn start_listening(&self, on_result: VoiceCallback, _on_error: VoiceCallback) {
        on_result(self.phrase.clone());
    }

    fn stop_listening(&self) {
        *self.stops.lock().unwrap() += 1;
    }
}

pub fn configured() -> ServerConfig {
    ServerConfig::normalized("http://127.0.0.1:8080", "abc")
}

/// Wait (bounded) until a published snapshot satisfies `pred`.
pub async fn wait_until(handle: &SessionHandle, pred: impl FnMut(&Session) -> bool) -> Session {
    let mut rx = handle.subscribe();
    let session = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for session state")
        .expect("session runtime stopped")
        .clone();
    session
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
