//! S3 error replies and their mapping onto [`BackgroundError`].
//!
//! S3 answers failures with an XML document:
//!
//! ```xml
//! <Error>
//!   <Code>NoSuchKey</Code>
//!   <Message>The specified key does not exist.</Message>
//!   <RequestId>4442587FB7D0A2F9</RequestId>
//! </Error>
//! ```
//!
//! `HEAD` replies carry no body, so those are classified by status only.

use serde::{Deserialize, Serialize};
use skiff_core::{BackgroundError, ErrorKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsError {
    /// The S3 error code (e.g. "NoSuchKey", "AccessDenied").
    pub code: String,
    pub message: String,
    /// HTTP status, `0` when the request never got a reply.
    pub status_code: u16,
    pub request_id: Option<String>,
    /// Region the server asked for in `AuthorizationHeaderMalformed`.
    pub region: Option<String>,
    pub retryable: bool,
}

impl fmt::Display for AwsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S3 error [{}]: {} (HTTP {})",
            self.code, self.message, self.status_code
        )?;
        if let Some(ref req_id) = self.request_id {
            write!(f, " [RequestId: {}]", req_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for AwsError {}

impl AwsError {
    pub fn new(code: &str, message: &str, status_code: u16) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            status_code,
            request_id: None,
            region: None,
            retryable: Self::is_retryable_code(code, status_code),
        }
    }

    /// A failure detected on this side of the wire.
    pub fn client(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            status_code: 0,
            request_id: None,
            region: None,
            retryable: false,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    fn is_retryable_code(code: &str, status_code: u16) -> bool {
        if matches!(status_code, 429 | 500 | 502 | 503 | 504) {
            return true;
        }
        matches!(
            code,
            "SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout"
        )
    }

    /// Whether the server rejected the authorization scheme and asks for
    /// AWS4-HMAC-SHA256 instead.
    pub fn requires_v4(&self) -> bool {
        match self.code.as_str() {
            "AuthorizationHeaderMalformed" => true,
            "InvalidRequest" => self.message.contains("AWS4-HMAC-SHA256"),
            _ => false,
        }
    }

    /// Parse an S3 XML error body. An empty body yields a code derived
    /// from the status.
    pub fn parse_xml_error(status_code: u16, body: &str) -> Self {
        let code = xml_text(body, "Code").unwrap_or_else(|| match status_code {
            301 => "PermanentRedirect".to_string(),
            403 => "AccessDenied".to_string(),
            404 => "NotFound".to_string(),
            _ => "UnknownError".to_string(),
        });
        let message = xml_text(body, "Message")
            .unwrap_or_else(|| format!("HTTP {} from S3", status_code));

        let mut err = Self::new(&code, &message, status_code);
        err.request_id = xml_text(body, "RequestId");
        err.region = xml_text(body, "Region");
        err
    }
}

impl From<reqwest::Error> for AwsError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            code: "HttpError".to_string(),
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()).unwrap_or(0),
            request_id: None,
            region: None,
            retryable: err.is_timeout() || err.is_connect(),
        }
    }
}

pub type AwsResult<T> = Result<T, AwsError>;

/// Classify an S3 failure.
pub fn map_s3_error(err: AwsError) -> BackgroundError {
    let kind = match err.code.as_str() {
        "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NotFound" => ErrorKind::NotFound,
        "AccessDenied" | "AllAccessDisabled" | "AccountProblem" => ErrorKind::AccessDenied,
        "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken"
        | "MissingSecurityHeader" => ErrorKind::LoginFailed,
        "AuthorizationHeaderMalformed" | "InvalidRequest" | "XAmzContentSHA256Mismatch"
        | "NotImplemented" | "PermanentRedirect" | "InvalidArgument" => {
            ErrorKind::Interoperability
        }
        "BadDigest" | "InvalidDigest" => ErrorKind::ChecksumMismatch,
        "EntityTooLarge" | "QuotaExceeded" | "TooManyBuckets" => ErrorKind::QuotaExceeded,
        "HttpError" | "RequestTimeout" => ErrorKind::TransportFailure,
        _ => match err.status_code {
            0 => ErrorKind::TransportFailure,
            401 => ErrorKind::LoginFailed,
            403 => ErrorKind::AccessDenied,
            404 => ErrorKind::NotFound,
            _ => ErrorKind::ProtocolError,
        },
    };
    BackgroundError::new(kind, err.message.clone()).with_source(err)
}

/// Text of the first `<tag>` element.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

/// Text of every `<tag>` element, in document order.
pub fn xml_text_all(xml: &str, tag: &str) -> Vec<String> {
    let mut results = Vec::new();
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(start) = xml[search_from..].find(&open) {
        let abs_start = search_from + start + open.len();
        if let Some(end) = xml[abs_start..].find(&close) {
            results.push(xml[abs_start..abs_start + end].to_string());
            search_from = abs_start + end + close.len();
        } else {
            break;
        }
    }
    results
}
