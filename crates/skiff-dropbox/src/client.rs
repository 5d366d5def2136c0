//! Low-level HTTP client for the Dropbox API v2.
//!
//! All API calls go through [`DropboxClient`] which handles:
//! - Bearer token injection
//! - Rate-limit (429) and 5xx retries with exponential back-off
//! - JSON error envelope parsing

use crate::error::DropboxError;
use crate::types::{
    CommitInfo, DropboxApiError, FullAccount, GetTemporaryLinkArg, GetTemporaryLinkResult,
    GetTemporaryUploadLinkArg, GetTemporaryUploadLinkResult,
};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Base URL of the RPC endpoint family.
pub const API_BASE: &str = "https://api.dropboxapi.com/2";

/// Maximum retries on 429 / 500-class responses.
const MAX_RETRIES: u32 = 4;

/// Routes the URL provider and session depend on. Implemented by
/// [`DropboxClient`]; tests substitute their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DropboxFiles: Send + Sync {
    /// `files/get_temporary_link`. The link expires after four hours.
    async fn temporary_link(&self, path: &str) -> Result<String, DropboxError>;

    /// `files/get_temporary_upload_link`.
    async fn temporary_upload_link(&self, path: &str) -> Result<String, DropboxError>;

    /// `users/get_current_account`. Used to validate the token.
    async fn current_account(&self) -> Result<FullAccount, DropboxError>;
}

/// HTTP client for a single Dropbox account.
#[derive(Clone)]
pub struct DropboxClient {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
    /// First back-off step; doubled per attempt.
    backoff: Duration,
}

impl std::fmt::Debug for DropboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxClient")
            .field("api_base", &self.api_base)
            .field("token_preview", &self.masked_token())
            .finish()
    }
}

impl DropboxClient {
    pub fn new(access_token: &str, timeout: Duration) -> Result<Self, DropboxError> {
        if access_token.is_empty() {
            return Err(DropboxError::MissingToken);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            api_base: API_BASE.to_string(),
            backoff: Duration::from_millis(500),
        })
    }

    /// Point the client at another RPC base, e.g. a local test server.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Show a masked version of the token for logging.
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.access_token.chars().collect();
        if chars.len() <= 8 {
            "****".into()
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}…{}", head, tail)
        }
    }

    // ── RPC endpoint (JSON in, JSON out) ────────────────────────────

    /// Call an RPC endpoint: `POST {api_base}/{route}` with JSON body.
    pub async fn rpc<P: Serialize + Sync, R: DeserializeOwned>(
        &self,
        route: &str,
        params: &P,
    ) -> Result<R, DropboxError> {
        let body = serde_json::to_vec(params).map_err(|e| DropboxError::Decode {
            route: route.to_string(),
            message: e.to_string(),
        })?;
        self.post(route, Some(body)).await
    }

    /// Call an RPC endpoint that takes no arguments.
    pub async fn rpc_no_body<R: DeserializeOwned>(&self, route: &str) -> Result<R, DropboxError> {
        self.post(route, None).await
    }

    async fn post<R: DeserializeOwned>(
        &self,
        route: &str,
        body: Option<Vec<u8>>,
    ) -> Result<R, DropboxError> {
        let url = format!("{}/{}", self.api_base, route);
        let mut last_err = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * 2u32.pow(attempt - 1)).await;
            }

            let mut request = self.http.post(&url).bearer_auth(&self.access_token);
            if let Some(ref body) = body {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }
            debug!("POST {} (attempt {})", url, attempt);

            let resp = match request.send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = format!("HTTP request to {} failed: {}", url, e);
                    continue;
                }
                Err(e) => return Err(DropboxError::Http(e)),
            };

            let status = resp.status();

            if status.as_u16() == 429 {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(
                    "Dropbox 429 rate-limit, retry after {}s (attempt {})",
                    retry_after, attempt
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                last_err = "Rate limited (429)".into();
                continue;
            }

            let text = resp.text().await?;

            if status.is_success() {
                return serde_json::from_str(&text).map_err(|e| DropboxError::Decode {
                    route: route.to_string(),
                    message: e.to_string(),
                });
            }

            if status.is_server_error() && attempt < MAX_RETRIES {
                warn!("Dropbox server error {} on {} (attempt {})", status, route, attempt);
                last_err = format!("Server error {} from {}: {}", status, url, text);
                continue;
            }

            // Client error (4xx except 429): not retryable
            let summary = match serde_json::from_str::<DropboxApiError>(&text) {
                Ok(e) => e
                    .error_summary
                    .unwrap_or_else(|| format!("Dropbox API error {}", status)),
                Err(_) => text,
            };
            return Err(DropboxError::Api {
                status: status.as_u16(),
                summary,
            });
        }

        Err(DropboxError::RetriesExhausted {
            attempts: MAX_RETRIES + 1,
            last: last_err,
        })
    }
}

#[async_trait]
impl DropboxFiles for DropboxClient {
    async fn temporary_link(&self, path: &str) -> Result<String, DropboxError> {
        let arg = GetTemporaryLinkArg {
            path: path.to_string(),
        };
        let result: GetTemporaryLinkResult = self.rpc("files/get_temporary_link", &arg).await?;
        Ok(result.link)
    }

    async fn temporary_upload_link(&self, path: &str) -> Result<String, DropboxError> {
        let arg = GetTemporaryUploadLinkArg {
            commit_info: CommitInfo::new(path),
            duration: None,
        };
        let result: GetTemporaryUploadLinkResult =
            self.rpc("files/get_temporary_upload_link", &arg).await?;
        Ok(result.link)
    }

    async fn current_account(&self) -> Result<FullAccount, DropboxError> {
        self.rpc_no_body("users/get_current_account").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(token: &str) -> DropboxClient {
        DropboxClient::new(token, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn new_rejects_empty_token() {
        assert!(matches!(
            DropboxClient::new("", Duration::from_secs(5)),
            Err(DropboxError::MissingToken)
        ));
    }

    #[test]
    fn masked_token_short() {
        assert_eq!(client("tiny").masked_token(), "****");
    }

    #[test]
    fn masked_token_long() {
        let m = client("sl.abcdef12345678").masked_token();
        assert!(m.starts_with("sl.a"));
        assert!(m.ends_with("5678"));
        assert!(m.contains('…'));
    }

    #[test]
    fn debug_hides_token() {
        let dbg = format!("{:?}", client("sl.testing12345678"));
        assert!(dbg.contains("DropboxClient"));
        assert!(!dbg.contains("testing1234"));
    }

    #[test]
    fn api_base_override_drops_trailing_slash() {
        let c = client("sl.testing12345678").with_api_base("http://127.0.0.1:9/2/");
        assert_eq!(c.api_base(), "http://127.0.0.1:9/2");
    }
}
