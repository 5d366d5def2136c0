//! Callbacks a session reports to. All of them may be invoked from any task.

use crate::error::{BackgroundError, BackgroundResult};
use crate::host::{Credentials, Host};
use std::sync::Arc;

pub trait ProgressListener: Send + Sync {
    fn message(&self, message: &str);
}

/// Receives every protocol line sent (`outbound == true`) or received.
pub trait TranscriptListener: Send + Sync {
    fn log(&self, outbound: bool, line: &str);
}

pub trait ConnectionListener: Send + Sync {
    fn will_open(&self, _host: &Host) {}
    fn did_open(&self, _host: &Host) {}
    fn will_close(&self, _host: &Host) {}
    fn did_close(&self, _host: &Host) {}
}

/// Asks the user for credentials after a failed login.
pub trait LoginCallback: Send + Sync {
    /// Return new credentials, or `Err(LoginCanceled)` when the user gives up.
    fn prompt(&self, host: &Host, reason: &str) -> BackgroundResult<Credentials>;

    fn fail(&self, _host: &Host, _reason: &str) {}
}

/// Asks for an optional password protecting a shared link.
pub trait PasswordCallback: Send + Sync {
    fn prompt(&self, title: &str, reason: &str) -> BackgroundResult<Option<String>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProgressListener;

impl ProgressListener for DisabledProgressListener {
    fn message(&self, _message: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTranscriptListener;

impl TranscriptListener for DisabledTranscriptListener {
    fn log(&self, _outbound: bool, _line: &str) {}
}

/// Forwards transcript lines to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTranscriptListener;

impl TranscriptListener for LoggingTranscriptListener {
    fn log(&self, outbound: bool, line: &str) {
        if outbound {
            log::trace!(">>> {}", line);
        } else {
            log::trace!("<<< {}", line);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLoginCallback;

impl LoginCallback for DisabledLoginCallback {
    fn prompt(&self, _host: &Host, _reason: &str) -> BackgroundResult<Credentials> {
        Err(BackgroundError::login_canceled())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPasswordCallback;

impl PasswordCallback for DisabledPasswordCallback {
    fn prompt(&self, _title: &str, _reason: &str) -> BackgroundResult<Option<String>> {
        Ok(None)
    }
}

/// Fan-out over several connection listeners.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl ConnectionListener for ListenerSet {
    fn will_open(&self, host: &Host) {
        self.listeners.iter().for_each(|l| l.will_open(host));
    }

    fn did_open(&self, host: &Host) {
        self.listeners.iter().for_each(|l| l.did_open(host));
    }

    fn will_close(&self, host: &Host) {
        self.listeners.iter().for_each(|l| l.will_close(host));
    }

    fn did_close(&self, host: &Host) {
        self.listeners.iter().for_each(|l| l.did_close(host));
    }
}
