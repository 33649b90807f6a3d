//! Session runtime: a single task owns the session snapshot and applies events one at a time.
//!
//! User intents arrive through a `SessionHandle`; request completions, voice callbacks, and
//! config changes arrive on internal channels. Each applied event publishes a whole new
//! snapshot on a `watch` channel.

use crate::config::{ConfigProvider, ServerConfig};
use crate::session::{Mode, Route, Session};
use crate::state_machine::{transition, Effect, Event, ExchangeReply, ExchangeRequest, SendError};
use crate::transport::{ChatRequest, CommandRequest, Transport};
use crate::voice::{NoOpVoiceCapture, NoOpVoiceOutput, VoiceCapture, VoiceOutput};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinError;

/// Returned by handle calls once the runtime task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session runtime has stopped")]
pub struct SessionClosed;

enum Command {
    Apply {
        event: Event,
        ack: oneshot::Sender<()>,
    },
    SaveConfig {
        base_url: String,
        secret: String,
        ack: oneshot::Sender<()>,
    },
}

/// Collaborators for a session. Voice defaults to the no-op implementations.
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    config: Arc<dyn ConfigProvider>,
    voice_capture: Arc<dyn VoiceCapture>,
    voice_output: Arc<dyn VoiceOutput>,
}

impl SessionBuilder {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            transport,
            config,
            voice_capture: Arc::new(NoOpVoiceCapture),
            voice_output: Arc::new(NoOpVoiceOutput),
        }
    }

    pub fn voice_capture(mut self, capture: Arc<dyn VoiceCapture>) -> Self {
        self.voice_capture = capture;
        self
    }

    pub fn voice_output(mut self, output: Arc<dyn VoiceOutput>) -> Self {
        self.voice_output = output;
        self
    }

    /// Subscribe to the config provider and start the runtime task. Must be called inside a tokio runtime.
    /// The task stops when the last handle is dropped.
    pub fn spawn(self) -> SessionHandle {
        let mut config_rx = self.config.subscribe();
        let session = Session::new(config_rx.borrow_and_update().clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(session.clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let runtime = SessionRuntime {
            session,
            transport: self.transport,
            config: self.config,
            voice_capture: self.voice_capture,
            voice_output: self.voice_output,
            commands: command_rx,
            events_rx: event_rx,
            events_tx: event_tx,
            config_rx,
            snapshots: snapshot_tx,
        };
        tokio::spawn(runtime.run());

        SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        }
    }
}

/// Cheap, cloneable entry point for a running session. Each call returns once the
/// resulting snapshot has been published.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Session>,
}

impl SessionHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> Session {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.snapshots.clone()
    }

    pub async fn set_input(&self, text: impl Into<String>) -> Result<(), SessionClosed> {
        self.apply(Event::InputChanged(text.into())).await
    }

    pub async fn select_mode(&self, mode: Mode) -> Result<(), SessionClosed> {
        self.apply(Event::ModeSelected(mode)).await
    }

    pub async fn acknowledge_error(&self) -> Result<(), SessionClosed> {
        self.apply(Event::ErrorAcknowledged).await
    }

    /// Send the current draft. A no-op while a request is in flight or when the draft is blank.
    /// Returns once the send is accepted (or absorbed); use `wait_idle` for the outcome.
    pub async fn send(&self) -> Result<(), SessionClosed> {
        self.apply(Event::SendRequested).await
    }

    pub async fn start_voice_input(&self) -> Result<(), SessionClosed> {
        self.apply(Event::VoiceStarted).await
    }

    pub async fn stop_voice_input(&self) -> Result<(), SessionClosed> {
        self.apply(Event::VoiceStopped).await
    }

    /// Persist new settings through the config provider. Returns after the attempt; a failed
    /// save is logged only. The session picks up the new config from the provider's stream.
    pub async fn save_config(
        &self,
        base_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<(), SessionClosed> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::SaveConfig {
                base_url: base_url.into(),
                secret: secret.into(),
                ack,
            })
            .map_err(|_| SessionClosed)?;
        done.await.map_err(|_| SessionClosed)
    }

    /// Wait until no request is in flight and return that snapshot.
    pub async fn wait_idle(&self) -> Result<Session, SessionClosed> {
        let mut rx = self.snapshots.clone();
        let session = rx
            .wait_for(|s| !s.is_loading)
            .await
            .map_err(|_| SessionClosed)?
            .clone();
        Ok(session)
    }

    async fn apply(&self, event: Event) -> Result<(), SessionClosed> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Apply { event, ack })
            .map_err(|_| SessionClosed)?;
        done.await.map_err(|_| SessionClosed)
    }
}

struct SessionRuntime {
    session: Session,
    transport: Arc<dyn Transport>,
    config: Arc<dyn ConfigProvider>,
    voice_capture: Arc<dyn VoiceCapture>,
    voice_output: Arc<dyn VoiceOutput>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    events_tx: mpsc::UnboundedSender<Event>,
    config_rx: watch::Receiver<ServerConfig>,
    snapshots: watch::Sender<Session>,
}

impl SessionRuntime {
    async fn run(mut self) {
        log::debug!("session runtime started");
        let mut config_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.apply(event),
                changed = self.config_rx.changed(), if config_open => match changed {
                    Ok(()) => {
                        let config = self.config_rx.borrow_and_update().clone();
                        log::info!("session: server config changed (base url {})", config.base_url);
                        self.apply(Event::ConfigChanged(config));
                    }
                    Err(_) => {
                        log::debug!("session: config provider stream closed");
                        config_open = false;
                    }
                },
            }
        }
        log::debug!("session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply { event, ack } => {
                self.apply(event);
                let _ = ack.send(());
            }
            Command::SaveConfig {
                base_url,
                secret,
                ack,
            } => {
                let provider = Arc::clone(&self.config);
                tokio::spawn(async move {
                    if let Err(e) = provider.persist(&base_url, &secret).await {
                        log::warn!("session: saving settings failed: {:#}", e);
                    }
                    let _ = ack.send(());
                });
            }
        }
    }

    fn apply(&mut self, event: Event) {
        let result = transition(&self.session, event);
        if result.session != self.session {
            self.session = result.session;
            self.snapshots.send_replace(self.session.clone());
        }
        for effect in result.effects {
            self.execute(effect);
        }
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::Dispatch(request) => {
                let transport = Arc::clone(&self.transport);
                let events = self.events_tx.clone();
                let mode = request.mode;
                tokio::spawn(async move {
                    // A panicking transport still has to complete the exchange.
                    let exchange =
                        tokio::spawn(async move { dispatch(transport.as_ref(), &request).await });
                    let result = match exchange.await {
                        Ok(result) => result,
                        Err(e) => {
                            log::error!("session: {} exchange task aborted: {}", mode, e);
                            Err(SendError::Unknown(panic_message(e)))
                        }
                    };
                    let event = match result {
                        Ok(reply) => {
                            log::debug!("session: {} exchange succeeded", mode);
                            Event::ExchangeSucceeded(reply)
                        }
                        Err(err) => {
                            log::warn!("session: {} exchange failed: {:?}", mode, err);
                            Event::ExchangeFailed(err)
                        }
                    };
                    let _ = events.send(event);
                });
            }
            Effect::Speak(text) => {
                if let Err(e) = self.voice_output.speak(&text) {
                    log::warn!("session: {}", e);
                }
            }
            Effect::StartListening => {
                let on_result = self.events_tx.clone();
                let on_error = self.events_tx.clone();
                self.voice_capture.start_listening(
                    Box::new(move |text| {
                        let _ = on_result.send(Event::VoiceCaptured(text));
                    }),
                    Box::new(move |message| {
                        let _ = on_error.send(Event::VoiceFailed(message));
                    }),
                );
            }
            Effect::StopListening => self.voice_capture.stop_listening(),
        }
    }
}

/// Panic payload text of a failed exchange task, or empty when there is none.
fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Run one exchange for the captured request, routed by mode.
async fn dispatch(
    transport: &dyn Transport,
    request: &ExchangeRequest,
) -> Result<ExchangeReply, SendError> {
    match request.mode.route() {
        Route::Chat => {
            log::info!("session: POST /chat to {}", request.config.base_url);
            let body = ChatRequest {
                message: request.text.clone(),
                conversation_id: request.conversation_id.clone(),
            };
            let res = transport.exchange_chat(&request.config, &body).await?;
            Ok(ExchangeReply::Chat(res))
        }
        Route::Command(kind) => {
            log::info!(
                "session: POST /assistant/{} to {}",
                kind.path_segment(),
                request.config.base_url
            );
            let body = CommandRequest {
                utterance: request.text.clone(),
            };
            let res = transport
                .exchange_command(&request.config, kind, &body)
                .await?;
            Ok(ExchangeReply::Command(res))
        }
    }
}
