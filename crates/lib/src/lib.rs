//! Orty client library — session state machine, transport, config, and voice collaborators
//! shared by the CLI and any other front end.

pub mod config;
pub mod init;
pub mod runtime;
pub mod session;
pub mod state_machine;
pub mod transport;
pub mod voice;

pub use runtime::{SessionBuilder, SessionClosed, SessionHandle};
pub use session::{Message, Mode, Session};
