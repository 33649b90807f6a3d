//! Session snapshot, messages, and modes.
//!
//! A `Session` is the whole UI-visible state of one conversation. It is replaced
//! wholesale on every transition, so a reader always holds a consistent snapshot.

use crate::config::ServerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single entry in the message log. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub is_user: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
        }
    }
}

/// Request category selected by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    Task,
    Reminder,
    Alarm,
    Timer,
}

/// Assistant command endpoints, one per non-chat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Task,
    Reminder,
    Alarm,
    Timer,
}

/// Where a send in a given mode goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Chat,
    Command(CommandKind),
}

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::Chat, Mode::Task, Mode::Reminder, Mode::Alarm, Mode::Timer];

    pub fn route(self) -> Route {
        match self {
            Mode::Chat => Route::Chat,
            Mode::Task => Route::Command(CommandKind::Task),
            Mode::Reminder => Route::Command(CommandKind::Reminder),
            Mode::Alarm => Route::Command(CommandKind::Alarm),
            Mode::Timer => Route::Command(CommandKind::Timer),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self.route() {
            Route::Chat => "chat",
            Route::Command(kind) => kind.path_segment(),
        }
    }
}

impl CommandKind {
    /// Lowercase name used as the `/assistant/{command}` path segment.
    pub fn path_segment(self) -> &'static str {
        match self {
            CommandKind::Task => "task",
            CommandKind::Reminder => "reminder",
            CommandKind::Alarm => "alarm",
            CommandKind::Timer => "timer",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode '{0}' (expected chat, task, reminder, alarm, or timer)")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// UI-visible state of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Message log, oldest first. Append-only.
    pub messages: Vec<Message>,
    /// Current draft text.
    pub input: String,
    /// True while a request is outstanding.
    pub is_loading: bool,
    /// Last failure, until acknowledged.
    pub error: Option<String>,
    /// Latest server config emitted by the config provider.
    #[serde(skip)]
    pub config: ServerConfig,
    /// Set by the last successful chat exchange.
    pub conversation_id: Option<String>,
    pub selected_mode: Mode,
    /// True while voice capture is active.
    pub is_listening: bool,
}

impl Session {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}
