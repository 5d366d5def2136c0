//! Request and response bodies of the Dropbox API v2 routes we call.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Dropbox API Error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dropbox API v2 error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxApiError {
    #[serde(default)]
    pub error_summary: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub user_message: Option<DropboxUserMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxUserMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Temporary links
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Argument of `files/get_temporary_link`.
#[derive(Debug, Clone, Serialize)]
pub struct GetTemporaryLinkArg {
    pub path: String,
}

/// Result of `files/get_temporary_link`. Only the link is used; the file
/// metadata that comes with it is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTemporaryLinkResult {
    pub link: String,
}

/// Commit target for an upload link.
#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub path: String,
    pub mode: WriteMode,
    pub autorename: bool,
    pub mute: bool,
}

impl CommitInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: WriteMode::Add,
            autorename: false,
            mute: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Add,
    Overwrite,
}

/// Argument of `files/get_temporary_upload_link`.
#[derive(Debug, Clone, Serialize)]
pub struct GetTemporaryUploadLinkArg {
    pub commit_info: CommitInfo,
    /// Link lifetime in seconds (60..=14400).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTemporaryUploadLinkResult {
    pub link: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Account
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountName {
    #[serde(default)]
    pub display_name: String,
}

/// Result of `users/get_current_account`, trimmed to what the session logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullAccount {
    pub account_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub name: AccountName,
}
