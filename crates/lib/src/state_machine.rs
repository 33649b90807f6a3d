//! Session state machine: a pure transition function from (snapshot, event) to (snapshot, effects).
//!
//! The runtime owns the snapshot, feeds events in one at a time, and executes the
//! returned effects (network dispatch, speech, voice capture). Nothing here does I/O.

use crate::config::ServerConfig;
use crate::session::{Message, Mode, Route, Session};
use crate::transport::{ChatResponse, CommandResponse, TransportError};

/// Something that happened to the session: a user intent or an async completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    InputChanged(String),
    ModeSelected(Mode),
    ErrorAcknowledged,
    SendRequested,
    ExchangeSucceeded(ExchangeReply),
    ExchangeFailed(SendError),
    ConfigChanged(ServerConfig),
    VoiceStarted,
    VoiceStopped,
    VoiceCaptured(String),
    VoiceFailed(String),
}

/// Work for the runtime to perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run exactly one exchange and report back `ExchangeSucceeded` or `ExchangeFailed`.
    Dispatch(ExchangeRequest),
    /// Hand reply text to the voice output.
    Speak(String),
    StartListening,
    StopListening,
}

/// Parameters captured at the moment a send is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub mode: Mode,
    /// Trimmed text (without the mode prefix shown in the log).
    pub text: String,
    pub config: ServerConfig,
    /// Conversation to continue, for chat sends.
    pub conversation_id: Option<String>,
}

impl ExchangeRequest {
    /// Validate and capture the request for the current draft.
    pub fn prepare(session: &Session) -> Result<Self, SendError> {
        let text = session.input.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        if !session.config.has_secret() {
            return Err(SendError::MissingSecret);
        }
        Ok(Self {
            mode: session.selected_mode,
            text: text.to_string(),
            config: session.config.clone(),
            conversation_id: session.conversation_id.clone(),
        })
    }

    /// Log entry for the user side of this request: the text, prefixed with the command name outside chat.
    pub fn user_message(&self) -> Message {
        match self.mode.route() {
            Route::Chat => Message::user(self.text.clone()),
            Route::Command(kind) => {
                Message::user(format!("{}: {}", kind.path_segment(), self.text))
            }
        }
    }
}

/// Successful exchange payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeReply {
    Chat(ChatResponse),
    Command(CommandResponse),
}

impl ExchangeReply {
    /// Text shown to the user: the chat reply or the command message.
    pub fn text(&self) -> &str {
        match self {
            ExchangeReply::Chat(r) => &r.reply,
            ExchangeReply::Command(r) => &r.message,
        }
    }
}

/// Why a send did not produce a reply. The display string is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Message cannot be empty.")]
    EmptyMessage,
    #[error("Secret is required in Settings.")]
    MissingSecret,
    #[error("Unable to reach server. Check LAN connection and URL.")]
    Unreachable,
    #[error("{}", describe_server_error(.status, .detail))]
    Server { status: u16, detail: String },
    #[error("{}", or_unexpected(.0))]
    Unknown(String),
}

fn describe_server_error(status: &u16, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        format!("Server error ({})", status)
    } else {
        format!("Server error ({}): {}", status, detail)
    }
}

fn or_unexpected(description: &str) -> &str {
    let description = description.trim();
    if description.is_empty() {
        "Unexpected error"
    } else {
        description
    }
}

impl From<TransportError> for SendError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unreachable(_) => SendError::Unreachable,
            TransportError::Server { status, detail } => SendError::Server { status, detail },
            TransportError::Unknown(description) => SendError::Unknown(description),
        }
    }
}

/// Result of a transition.
#[derive(Debug)]
pub struct Transition {
    pub session: Session,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn new(session: Session) -> Self {
        Self {
            session,
            effects: vec![],
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Pure transition function. Never fails: events that do not apply leave the snapshot unchanged.
pub fn transition(session: &Session, event: Event) -> Transition {
    let mut next = session.clone();
    match event {
        Event::InputChanged(text) => {
            next.input = text;
            Transition::new(next)
        }
        Event::ModeSelected(mode) => {
            next.selected_mode = mode;
            Transition::new(next)
        }
        Event::ErrorAcknowledged => {
            next.error = None;
            Transition::new(next)
        }
        Event::SendRequested => send_requested(next),
        Event::ExchangeSucceeded(reply) => {
            if !next.is_loading {
                log::warn!("session: exchange result arrived with no request in flight, ignored");
                return Transition::new(next);
            }
            next.is_loading = false;
            let text = reply.text().to_string();
            if text.trim().is_empty() {
                let err = SendError::Unknown("Server returned an empty reply.".to_string());
                next.error = Some(err.to_string());
                return Transition::new(next);
            }
            if let ExchangeReply::Chat(chat) = &reply {
                next.conversation_id = Some(chat.conversation_id.clone());
            }
            next.messages.push(Message::assistant(text.clone()));
            Transition::new(next).with_effect(Effect::Speak(text))
        }
        Event::ExchangeFailed(err) => {
            if !next.is_loading {
                log::warn!("session: exchange failure arrived with no request in flight, ignored");
                return Transition::new(next);
            }
            next.is_loading = false;
            next.error = Some(err.to_string());
            Transition::new(next)
        }
        Event::ConfigChanged(config) => {
            next.config = config;
            Transition::new(next)
        }
        Event::VoiceStarted => {
            next.is_listening = true;
            Transition::new(next).with_effect(Effect::StartListening)
        }
        Event::VoiceStopped => {
            next.is_listening = false;
            Transition::new(next).with_effect(Effect::StopListening)
        }
        Event::VoiceCaptured(text) => {
            next.input = text;
            next.is_listening = false;
            Transition::new(next)
        }
        Event::VoiceFailed(message) => {
            next.error = Some(message);
            next.is_listening = false;
            Transition::new(next)
        }
    }
}

fn send_requested(mut next: Session) -> Transition {
    if next.is_loading || next.input.trim().is_empty() {
        log::debug!("session: send absorbed (loading={})", next.is_loading);
        return Transition::new(next);
    }
    match ExchangeRequest::prepare(&next) {
        Ok(request) => {
            next.messages.push(request.user_message());
            next.input.clear();
            next.error = None;
            next.is_loading = true;
            Transition::new(next).with_effect(Effect::Dispatch(request))
        }
        Err(err) => {
            // Rejected before dispatch: nothing appended, draft kept.
            next.error = Some(err.to_string());
            Transition::new(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CommandKind;
    use proptest::prelude::*;

    fn configured() -> Session {
        Session::new(ServerConfig::normalized("http://127.0.0.1:8080", "abc"))
    }

    fn apply(session: &Session, events: impl IntoIterator<Item = Event>) -> (Session, Vec<Effect>) {
        let mut s = session.clone();
        let mut effects = vec![];
        for e in events {
            let t = transition(&s, e);
            s = t.session;
            effects.extend(t.effects);
        }
        (s, effects)
    }

    fn chat_reply(reply: &str, id: &str) -> Event {
        Event::ExchangeSucceeded(ExchangeReply::Chat(ChatResponse {
            reply: reply.to_string(),
            conversation_id: id.to_string(),
        }))
    }

    #[test]
    fn chat_send_goes_pending_with_dispatch() {
        let (s, effects) = apply(
            &configured(),
            [Event::InputChanged("  hi  ".into()), Event::SendRequested],
        );
        assert!(s.is_loading);
        assert_eq!(s.input, "");
        assert_eq!(s.messages, vec![Message::user("hi")]);
        match effects.as_slice() {
            [Effect::Dispatch(req)] => {
                assert_eq!(req.mode, Mode::Chat);
                assert_eq!(req.text, "hi");
                assert_eq!(req.config.secret, "abc");
                assert_eq!(req.conversation_id, None);
            }
            other => panic!("unexpected effects: {:?}", other),
        }
    }

    #[test]
    fn chat_success_appends_reply_and_sets_conversation() {
        let (s, effects) = apply(
            &configured(),
            [
                Event::InputChanged("hi".into()),
                Event::SendRequested,
                chat_reply("hello", "123"),
            ],
        );
        assert_eq!(s.messages, vec![Message::user("hi"), Message::assistant("hello")]);
        assert_eq!(s.conversation_id.as_deref(), Some("123"));
        assert!(!s.is_loading);
        assert_eq!(s.error, None);
        assert_eq!(effects.last(), Some(&Effect::Speak("hello".into())));
    }

    #[test]
    fn next_chat_send_carries_conversation_id() {
        let (s, effects) = apply(
            &configured(),
            [
                Event::InputChanged("hi".into()),
                Event::SendRequested,
                chat_reply("hello", "123"),
                Event::InputChanged("again".into()),
                Event::SendRequested,
            ],
        );
        assert!(s.is_loading);
        match effects.last() {
            Some(Effect::Dispatch(req)) => assert_eq!(req.conversation_id.as_deref(), Some("123")),
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn command_send_prefixes_user_message_and_keeps_conversation() {
        let mut start = configured();
        start.conversation_id = Some("c1".into());
        let (s, effects) = apply(
            &start,
            [
                Event::ModeSelected(Mode::Alarm),
                Event::InputChanged("set alarm for 7am".into()),
                Event::SendRequested,
                Event::ExchangeSucceeded(ExchangeReply::Command(CommandResponse {
                    status: "ok".into(),
                    message: "alarm set".into(),
                })),
            ],
        );
        assert_eq!(
            s.messages,
            vec![
                Message::user("alarm: set alarm for 7am"),
                Message::assistant("alarm set")
            ]
        );
        assert_eq!(s.conversation_id.as_deref(), Some("c1"));
        match &effects[0] {
            Effect::Dispatch(req) => {
                assert_eq!(req.mode.route(), Route::Command(CommandKind::Alarm));
                assert_eq!(req.text, "set alarm for 7am");
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn missing_secret_reports_without_dispatch_or_append() {
        let start = Session::new(ServerConfig::default());
        let (s, effects) = apply(&start, [Event::InputChanged("hi".into()), Event::SendRequested]);
        assert!(effects.is_empty());
        assert!(s.messages.is_empty());
        assert!(!s.is_loading);
        assert_eq!(s.error.as_deref(), Some("Secret is required in Settings."));
        assert_eq!(s.input, "hi");
    }

    #[test]
    fn failure_keeps_user_message() {
        let (s, _) = apply(
            &configured(),
            [
                Event::InputChanged("hi".into()),
                Event::SendRequested,
                Event::ExchangeFailed(SendError::Unreachable),
            ],
        );
        assert_eq!(s.messages, vec![Message::user("hi")]);
        assert!(!s.is_loading);
        assert_eq!(
            s.error.as_deref(),
            Some("Unable to reach server. Check LAN connection and URL.")
        );
    }

    #[test]
    fn send_clears_previous_error() {
        let mut start = configured();
        start.error = Some("old".into());
        let (s, _) = apply(&start, [Event::InputChanged("hi".into()), Event::SendRequested]);
        assert_eq!(s.error, None);
    }

    #[test]
    fn empty_reply_is_reported_as_failure() {
        let (s, effects) = apply(
            &configured(),
            [Event::InputChanged("hi".into()), Event::SendRequested, chat_reply("  ", "9")],
        );
        assert_eq!(s.messages.len(), 1);
        assert!(!s.is_loading);
        assert_eq!(s.error.as_deref(), Some("Server returned an empty reply."));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Speak(_))));
        assert_eq!(s.conversation_id, None);
    }

    #[test]
    fn reply_text_is_stored_as_received() {
        let (s, effects) = apply(
            &configured(),
            [
                Event::InputChanged("hi".into()),
                Event::SendRequested,
                chat_reply("  hello\n", "1"),
            ],
        );
        assert_eq!(s.messages[1], Message::assistant("  hello\n"));
        assert_eq!(effects.last(), Some(&Effect::Speak("  hello\n".into())));
    }

    #[test]
    fn stray_completion_is_ignored() {
        let start = configured();
        let (s, effects) = apply(&start, [chat_reply("late", "1")]);
        assert_eq!(s, start);
        assert!(effects.is_empty());
    }

    #[test]
    fn prepare_rejects_blank_input() {
        let mut s = configured();
        s.input = " \t ".into();
        assert_eq!(ExchangeRequest::prepare(&s), Err(SendError::EmptyMessage));
    }

    #[test]
    fn error_descriptions() {
        assert_eq!(
            SendError::from(TransportError::Server {
                status: 401,
                detail: "Unauthorized".into()
            })
            .to_string(),
            "Server error (401): Unauthorized"
        );
        assert_eq!(
            SendError::from(TransportError::Server { status: 502, detail: "".into() }).to_string(),
            "Server error (502)"
        );
        assert_eq!(SendError::Unknown("  ".into()).to_string(), "Unexpected error");
        assert_eq!(
            SendError::from(TransportError::Unreachable("connection refused".into())),
            SendError::Unreachable
        );
    }

    #[test]
    fn voice_events_update_input_and_listening() {
        let (s, effects) = apply(&configured(), [Event::VoiceStarted]);
        assert!(s.is_listening);
        assert_eq!(effects, vec![Effect::StartListening]);

        let (s, _) = apply(&s, [Event::VoiceCaptured("remind me".into())]);
        assert!(!s.is_listening);
        assert_eq!(s.input, "remind me");

        let (s, _) = apply(&s, [Event::VoiceStarted, Event::VoiceFailed("no mic".into())]);
        assert!(!s.is_listening);
        assert_eq!(s.error.as_deref(), Some("no mic"));
        assert_eq!(s.input, "remind me");
    }

    #[test]
    fn config_change_mid_flight_keeps_request_parameters() {
        let (s, effects) = apply(
            &configured(),
            [
                Event::InputChanged("hi".into()),
                Event::SendRequested,
                Event::ConfigChanged(ServerConfig::normalized("http://10.0.0.9:8080", "new")),
            ],
        );
        assert!(s.is_loading);
        assert_eq!(s.config.secret, "new");
        match &effects[0] {
            Effect::Dispatch(req) => assert_eq!(req.config.secret, "abc"),
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    fn arb_mode() -> impl Strategy<Value = Mode> {
        prop_oneof![
            Just(Mode::Chat),
            Just(Mode::Task),
            Just(Mode::Reminder),
            Just(Mode::Alarm),
            Just(Mode::Timer),
        ]
    }

    fn arb_edit() -> impl Strategy<Value = Event> {
        prop_oneof![
            "[a-zA-Z ]{0,20}".prop_map(Event::InputChanged),
            arb_mode().prop_map(Event::ModeSelected),
        ]
    }

    fn arb_reply() -> impl Strategy<Value = ExchangeReply> {
        prop_oneof![
            ("[a-z]{1,10}", "[0-9]{1,4}").prop_map(|(reply, conversation_id)| {
                ExchangeReply::Chat(ChatResponse {
                    reply,
                    conversation_id,
                })
            }),
            "[a-z]{1,10}".prop_map(|message| ExchangeReply::Command(CommandResponse {
                status: "ok".into(),
                message,
            })),
        ]
    }

    proptest! {
        #[test]
        fn prop_edits_never_touch_log(edits in proptest::collection::vec(arb_edit(), 0..20)) {
            let start = configured();
            let (s, effects) = apply(&start, edits);
            prop_assert_eq!(s.messages, start.messages);
            prop_assert_eq!(s.conversation_id, start.conversation_id);
            prop_assert!(effects.is_empty());
        }

        #[test]
        fn prop_blank_send_is_noop(blank in "[ \t\n]{0,8}", mode in arb_mode()) {
            let mut start = configured();
            start.selected_mode = mode;
            start.input = blank;
            let t = transition(&start, Event::SendRequested);
            prop_assert_eq!(t.session, start);
            prop_assert!(t.effects.is_empty());
        }

        #[test]
        fn prop_send_while_loading_is_noop(input in "[a-zA-Z ]{0,20}", mode in arb_mode()) {
            let mut start = configured();
            start.is_loading = true;
            start.selected_mode = mode;
            start.input = input;
            let t = transition(&start, Event::SendRequested);
            prop_assert_eq!(t.session, start);
            prop_assert!(t.effects.is_empty());
        }

        #[test]
        fn prop_success_appends_two(text in "[a-z]{1,10}", mode in arb_mode(), reply in arb_reply()) {
            let mut start = configured();
            start.selected_mode = mode;
            let (s, _) = apply(&start, [Event::InputChanged(text), Event::SendRequested, Event::ExchangeSucceeded(reply)]);
            prop_assert_eq!(s.messages.len(), 2);
            prop_assert!(s.messages[0].is_user);
            prop_assert!(!s.messages[1].is_user);
            prop_assert!(!s.is_loading);
        }

        #[test]
        fn prop_failure_appends_one(text in "[a-z]{1,10}", mode in arb_mode(), detail in "[a-z]{0,10}") {
            let mut start = configured();
            start.selected_mode = mode;
            let (s, _) = apply(&start, [
                Event::InputChanged(text),
                Event::SendRequested,
                Event::ExchangeFailed(SendError::Unknown(detail)),
            ]);
            prop_assert_eq!(s.messages.len(), 1);
            prop_assert!(s.messages[0].is_user);
            prop_assert!(s.error.as_deref().is_some_and(|e| !e.is_empty()));
            prop_assert!(!s.is_loading);
        }

        #[test]
        fn prop_acknowledge_is_idempotent(error in proptest::option::of("[a-z]{1,10}")) {
            let mut start = configured();
            start.error = error;
            let once = transition(&start, Event::ErrorAcknowledged).session;
            let twice = transition(&once, Event::ErrorAcknowledged).session;
            prop_assert_eq!(once.error.clone(), None);
            prop_assert_eq!(once, twice);
        }
    }
}
