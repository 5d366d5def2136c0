//! FTP-specific error type and its mapping onto [`BackgroundError`].

use serde::{Deserialize, Serialize};
use skiff_core::{BackgroundError, ErrorKind};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP response code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS resolution failure.
    ConnectionFailed,
    /// Wrong username/password.
    AuthFailed,
    /// Server returned a 4xx/5xx for a command.
    CommandRejected,
    /// Data channel could not be established (PASV/PORT failed).
    DataChannelFailed,
    /// Transfer aborted or incomplete.
    TransferFailed,
    /// Server sent an un-parseable response.
    ProtocolError,
    /// An I/O error on the local side.
    IoError,
    Timeout,
    /// The server closed the control connection without replying.
    NullReply,
    PermissionDenied,
    NotFound,
    QuotaExceeded,
    /// The connection was interrupted.
    Cancelled,
    Unknown,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn null_reply(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NullReply, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(FtpErrorKind::Cancelled, "Connection interrupted")
    }

    /// Whether the server answered at all. `false` means the control
    /// connection is gone and only a reconnect helps.
    pub fn is_reply(&self) -> bool {
        self.code.is_some()
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::NullReply,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found")
                    || lower.contains("no such")
                    || lower.contains("not exist")
                {
                    FtpErrorKind::NotFound
                } else if lower.contains("quota") {
                    FtpErrorKind::QuotaExceeded
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            552 => FtpErrorKind::QuotaExceeded,
            451 | 452 => FtpErrorKind::TransferFailed,
            _ if code >= 400 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::Unknown,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
        }
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => Self::null_reply(e.to_string()),
            _ => Self::new(FtpErrorKind::IoError, e.to_string()),
        }
    }
}

/// Translate an FTP failure into the protocol-neutral taxonomy. The
/// original error stays attached as the source.
pub fn map_ftp_error(err: FtpError) -> BackgroundError {
    let kind = match err.kind {
        FtpErrorKind::Cancelled => ErrorKind::ConnectionCanceled,
        FtpErrorKind::AuthFailed => ErrorKind::LoginFailed,
        FtpErrorKind::ConnectionFailed
        | FtpErrorKind::Timeout
        | FtpErrorKind::NullReply
        | FtpErrorKind::IoError
        | FtpErrorKind::DataChannelFailed => ErrorKind::TransportFailure,
        FtpErrorKind::PermissionDenied => ErrorKind::AccessDenied,
        FtpErrorKind::NotFound => ErrorKind::NotFound,
        FtpErrorKind::QuotaExceeded => ErrorKind::QuotaExceeded,
        FtpErrorKind::CommandRejected
        | FtpErrorKind::TransferFailed
        | FtpErrorKind::ProtocolError
        | FtpErrorKind::Unknown => ErrorKind::ProtocolError,
    };
    BackgroundError::new(kind, err.message.clone()).with_source(err)
}
