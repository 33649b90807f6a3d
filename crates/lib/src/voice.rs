//! Voice collaborators: speech capture (fills the input) and speech output (reads replies).
//!
//! Both are optional. The no-op implementations are the defaults for a session.

use std::process::{Command, Stdio};

/// One-shot callback for a capture result or error message.
pub type VoiceCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Speech-to-text engine. Exactly one of the callbacks is invoked per `start_listening`.
pub trait VoiceCapture: Send + Sync {
    fn start_listening(&self, on_result: VoiceCallback, on_error: VoiceCallback);
    fn stop_listening(&self);
}

/// Text-to-speech engine. Called fire-and-forget after each reply.
pub trait VoiceOutput: Send + Sync {
    fn speak(&self, text: &str) -> Result<(), VoiceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("speech output failed: {0}")]
    Output(String),
}

/// Capture engine used when no recognizer is configured: always reports an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpVoiceCapture;

pub const VOICE_NOT_CONFIGURED: &str = "Voice recognition plugin not configured.";

impl VoiceCapture for NoOpVoiceCapture {
    fn start_listening(&self, _on_result: VoiceCallback, on_error: VoiceCallback) {
        on_error(VOICE_NOT_CONFIGURED.to_string());
    }

    fn stop_listening(&self) {}
}

/// Output engine that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpVoiceOutput;

impl VoiceOutput for NoOpVoiceOutput {
    fn speak(&self, _text: &str) -> Result<(), VoiceError> {
        Ok(())
    }
}

/// Speaks by running a text-to-speech program (e.g. `espeak`) with the text as its last argument.
/// No shell is used. The program runs on a background thread; its exit status is only logged.
#[derive(Debug, Clone)]
pub struct ProcessVoiceOutput {
    program: String,
    args: Vec<String>,
}

impl ProcessVoiceOutput {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line like `"espeak -s 160"` on whitespace into program and args.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl VoiceOutput for ProcessVoiceOutput {
    fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::Output(format!("{}: {}", self.program, e)))?;
        let program = self.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                log::warn!("voice output: {} exited with {}", program, status)
            }
            Err(e) => log::warn!("voice output: waiting for {} failed: {}", program, e),
            Ok(_) => {}
        });
        Ok(())
    }
}
