//! Dropbox failures and their mapping onto [`BackgroundError`].

use skiff_core::{BackgroundError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum DropboxError {
    #[error("Dropbox access token must not be empty")]
    MissingToken,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success reply with the `error_summary` of the envelope.
    #[error("Dropbox API error {status}: {summary}")]
    Api { status: u16, summary: String },
    #[error("Unexpected response from {route}: {message}")]
    Decode { route: String, message: String },
    #[error("Dropbox API request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl DropboxError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DropboxError::Api { status, .. } => Some(*status),
            DropboxError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// `error_summary` of an API error, e.g. `path/not_found/..`.
    pub fn summary(&self) -> Option<&str> {
        match self {
            DropboxError::Api { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// Classify a Dropbox failure. Summaries are matched by tag prefix because
/// Dropbox appends a random suffix to every `error_summary`.
pub fn map_dropbox_error(err: DropboxError) -> BackgroundError {
    let kind = match &err {
        DropboxError::MissingToken => ErrorKind::LoginFailed,
        DropboxError::Http(_) | DropboxError::RetriesExhausted { .. } => ErrorKind::TransportFailure,
        DropboxError::Decode { .. } => ErrorKind::Interoperability,
        DropboxError::Api { status, summary } => classify(*status, summary),
    };
    let message = match err.summary() {
        Some(summary) => summary.trim_end_matches("/..").trim_end_matches('/').to_string(),
        None => err.to_string(),
    };
    BackgroundError::new(kind, message).with_source(err)
}

fn classify(status: u16, summary: &str) -> ErrorKind {
    let has = |tag: &str| summary.split('/').any(|part| part.starts_with(tag));
    match status {
        401 => ErrorKind::LoginFailed,
        403 => ErrorKind::AccessDenied,
        _ if has("not_found") || has("not_file") || has("not_folder") => ErrorKind::NotFound,
        _ if has("insufficient_space") => ErrorKind::QuotaExceeded,
        _ if has("no_write_permission") || has("restricted_content") => ErrorKind::AccessDenied,
        _ if has("unsupported_") => ErrorKind::Unsupported,
        400 | 409 => ErrorKind::Interoperability,
        _ => ErrorKind::ProtocolError,
    }
}
