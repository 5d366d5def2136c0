//! Protocol-neutral error taxonomy.
//!
//! Every protocol maps its own failures (FTP reply codes, Dropbox error
//! summaries, S3 error codes) onto [`BackgroundError`] before they leave the
//! protocol crate, so callers only ever match on [`ErrorKind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Categorised failure of a background operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundError {
    pub kind: ErrorKind,
    pub message: String,
    /// Additional explanation shown below the message.
    pub detail: Option<String>,
    #[serde(skip)]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The user or another task interrupted the connection.
    ConnectionCanceled,
    /// The login prompt was dismissed.
    LoginCanceled,
    /// Credentials were rejected after the allowed retries.
    LoginFailed,
    /// Socket, DNS or timeout failure.
    TransportFailure,
    /// The server violated the protocol or rejected a command.
    ProtocolError,
    /// The server answered in a way we cannot work with (unexpected mode,
    /// signature version, listing format).
    Interoperability,
    /// Local and remote checksums disagree after a transfer.
    ChecksumMismatch,
    NotFound,
    AccessDenied,
    QuotaExceeded,
    /// The local digest could not be computed.
    ChecksumComputation,
    /// The session does not offer the requested capability.
    Unsupported,
}

pub type BackgroundResult<T> = Result<T, BackgroundError>;

impl BackgroundError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            source: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the underlying cause so it stays reachable through
    /// [`std::error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn canceled() -> Self {
        Self::new(ErrorKind::ConnectionCanceled, "Connection canceled")
    }

    pub fn login_canceled() -> Self {
        Self::new(ErrorKind::LoginCanceled, "Login canceled")
    }

    pub fn login_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoginFailed, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailure, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, msg)
    }

    pub fn interoperability(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interoperability, msg)
    }

    pub fn checksum_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChecksumMismatch, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, msg)
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, msg)
    }

    pub fn checksum_computation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChecksumComputation, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionCanceled | ErrorKind::LoginCanceled
        )
    }
}

impl fmt::Display for BackgroundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref detail) = self.detail {
            write!(f, ". {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackgroundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for BackgroundError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::AccessDenied,
            _ => ErrorKind::TransportFailure,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<BackgroundError> for String {
    fn from(err: BackgroundError) -> String {
        err.to_string()
    }
}
