//! S3 REST client.
//!
//! Every request is signed with the session's current
//! [`SignatureVersion`]. When the server rejects the legacy scheme and asks
//! for AWS4-HMAC-SHA256, the shared [`SignatureSelector`] is switched so the
//! next request goes out with a v4 signature. Object writes are never
//! replayed here; the upload service decides whether to try again.

use crate::error::{AwsError, AwsResult};
use crate::signing::{
    uri_encode_path, AwsCredentials, SigV2Signer, SigV4Signer, SignatureSelector,
    SignatureVersion, SignedRequest, EMPTY_PAYLOAD_HASH,
};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use skiff_core::transfer::{HashAlgorithm, TransferStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Prefix of user metadata headers.
pub const METADATA_PREFIX: &str = "x-amz-meta-";

/// Attempts for transient failures (503 SlowDown and friends).
const MAX_ATTEMPTS: u32 = 3;

/// Object as acknowledged by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    /// ETag with surrounding quotes removed; empty when the server sent none.
    pub etag: String,
    pub version_id: Option<String>,
}

/// Reply to `HEAD` on an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: i64,
    pub etag: String,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    /// User metadata, keys without the `x-amz-meta-` prefix.
    pub metadata: BTreeMap<String, String>,
}

/// The object operations the S3 features need.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait S3Client: Send + Sync {
    /// `PUT` the whole object. Content type and user metadata come from
    /// `status`; a SHA-256 checksum on `status` is sent as the payload hash.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        status: &TransferStatus,
    ) -> AwsResult<StoredObject>;

    async fn head_object(&self, bucket: &str, key: &str) -> AwsResult<ObjectHead>;

    /// Replace the user metadata by copying the object onto itself.
    async fn copy_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> AwsResult<()>;

    async fn list_buckets(&self) -> AwsResult<Vec<String>>;
}

/// Raw reply of a signed request.
#[derive(Debug, Clone)]
pub struct S3Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl S3Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

struct S3Request<'a> {
    method: &'a str,
    bucket: Option<&'a str>,
    key: Option<&'a str>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    payload_hash: Option<String>,
}

impl<'a> S3Request<'a> {
    fn new(method: &'a str) -> Self {
        Self {
            method,
            bucket: None,
            key: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
            payload_hash: None,
        }
    }

    fn object(method: &'a str, bucket: &'a str, key: &'a str) -> Self {
        Self {
            bucket: Some(bucket),
            key: Some(key),
            ..Self::new(method)
        }
    }

    /// `/bucket/key`, URI-encoded. Path-style addressing.
    fn resource(&self) -> String {
        let mut resource = String::from("/");
        if let Some(bucket) = self.bucket {
            resource.push_str(bucket);
            if let Some(key) = self.key {
                resource.push('/');
                resource.push_str(&uri_encode_path(key.trim_start_matches('/')));
            }
        }
        resource
    }
}

/// reqwest based [`S3Client`] with path-style addressing.
#[derive(Clone)]
pub struct S3RestClient {
    http: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    endpoint: String,
    selector: Arc<SignatureSelector>,
    backoff: Duration,
}

impl std::fmt::Debug for S3RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3RestClient")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .field("signature", &self.selector.get())
            .finish()
    }
}

impl S3RestClient {
    pub fn new(
        credentials: AwsCredentials,
        selector: Arc<SignatureSelector>,
        timeout: Duration,
    ) -> AwsResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            credentials,
            region: DEFAULT_REGION.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            selector,
            backoff: Duration::from_millis(200),
        })
    }

    /// Custom endpoint (MinIO, LocalStack, a test server).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn signature_version(&self) -> SignatureVersion {
        self.selector.get()
    }

    fn host_header(&self) -> String {
        match url::Url::parse(&self.endpoint) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => "s3.amazonaws.com".to_string(),
            },
            Err(_) => "s3.amazonaws.com".to_string(),
        }
    }

    fn sign(&self, request: &S3Request<'_>, version: SignatureVersion) -> SignedRequest {
        let resource = request.resource();
        let url = format!("{}{}", self.endpoint, resource);
        let mut headers = request.headers.clone();
        headers.insert("host".to_string(), self.host_header());
        match version {
            SignatureVersion::Aws4HmacSha256 => {
                SigV4Signer::new(self.credentials.clone(), &self.region, "s3").sign_request(
                    request.method,
                    &url,
                    &headers,
                    &request.body,
                    request.payload_hash.as_deref(),
                    Utc::now(),
                )
            }
            SignatureVersion::Aws2 => {
                headers.insert(
                    "date".to_string(),
                    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                );
                SigV2Signer::new(self.credentials.clone()).sign_request(
                    request.method,
                    &url,
                    &resource,
                    &headers,
                )
            }
        }
    }

    async fn send(&self, request: &S3Request<'_>) -> AwsResult<S3Response> {
        let version = self.selector.get();
        let signed = self.sign(request, version);
        debug!("{} {} ({})", signed.method, signed.url, version);

        let method = reqwest::Method::from_bytes(signed.method.as_bytes()).map_err(|_| {
            AwsError::client("InvalidMethod", format!("Invalid HTTP method: {}", signed.method))
        })?;
        let mut req = self.http.request(method, &signed.url);
        for (key, value) in &signed.headers {
            // reqwest sets Host from the URL
            if key != "host" {
                req = req.header(key.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() || request.method == "PUT" {
            req = req.body(request.body.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let mut headers = BTreeMap::new();
        for (key, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = resp.text().await?;
        Ok(S3Response {
            status,
            headers,
            body,
        })
    }

    /// Send with retries for transient failures. A rejected signature
    /// scheme switches the selector; `replay_on_switch` sends the request
    /// once more under the new scheme.
    async fn execute(&self, request: &S3Request<'_>, replay_on_switch: bool) -> AwsResult<S3Response> {
        let mut replayed = false;
        let mut attempt = 0;
        loop {
            let error = match self.send(request).await {
                Ok(response) if (200..300).contains(&response.status) => return Ok(response),
                Ok(response) => {
                    let mut error = AwsError::parse_xml_error(response.status, &response.body);
                    if error.request_id.is_none() {
                        error.request_id = response.header("x-amz-request-id").map(str::to_string);
                    }
                    error
                }
                Err(e) => e,
            };

            if error.requires_v4() && self.selector.switch_to(SignatureVersion::Aws4HmacSha256) {
                warn!(
                    "Server rejected {} signature ({}), switching to {}",
                    SignatureVersion::Aws2,
                    error.code,
                    SignatureVersion::Aws4HmacSha256
                );
                if replay_on_switch && !replayed {
                    replayed = true;
                    continue;
                }
                return Err(error);
            }

            attempt += 1;
            if error.retryable && attempt < MAX_ATTEMPTS {
                let delay = self.backoff * 2u32.pow(attempt - 1);
                warn!(
                    "S3 retryable error (attempt {}/{}): {} - retrying in {}ms",
                    attempt,
                    MAX_ATTEMPTS,
                    error.code,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(error);
        }
    }
}

#[async_trait]
impl S3Client for S3RestClient {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        status: &TransferStatus,
    ) -> AwsResult<StoredObject> {
        let mut request = S3Request::object("PUT", bucket, key);
        request.headers.insert(
            "content-type".to_string(),
            status
                .mime
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        );
        for (name, value) in &status.metadata {
            request
                .headers
                .insert(format!("{}{}", METADATA_PREFIX, name.to_ascii_lowercase()), value.clone());
        }
        request.payload_hash = status
            .checksum
            .as_ref()
            .filter(|c| c.algorithm == HashAlgorithm::Sha256)
            .map(|c| c.hash.clone());
        request.body = body;

        let response = self.execute(&request, false).await?;
        Ok(StoredObject {
            etag: response.header("etag").map(strip_quotes).unwrap_or_default(),
            version_id: response.header("x-amz-version-id").map(str::to_string),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> AwsResult<ObjectHead> {
        let mut request = S3Request::object("HEAD", bucket, key);
        request.payload_hash = Some(EMPTY_PAYLOAD_HASH.to_string());
        let response = self.execute(&request, true).await?;
        let metadata = response
            .headers
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(METADATA_PREFIX)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect();
        Ok(ObjectHead {
            size: response
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(-1),
            etag: response.header("etag").map(strip_quotes).unwrap_or_default(),
            content_type: response.header("content-type").map(str::to_string),
            last_modified: response.header("last-modified").map(str::to_string),
            metadata,
        })
    }

    async fn copy_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> AwsResult<()> {
        let mut request = S3Request::object("PUT", bucket, key);
        let source = format!("/{}/{}", bucket, uri_encode_path(key.trim_start_matches('/')));
        request.headers.insert("x-amz-copy-source".to_string(), source);
        request
            .headers
            .insert("x-amz-metadata-directive".to_string(), "REPLACE".to_string());
        for (name, value) in metadata {
            request
                .headers
                .insert(format!("{}{}", METADATA_PREFIX, name.to_ascii_lowercase()), value.clone());
        }
        let response = self.execute(&request, true).await?;
        // A copy may fail after the 200 status line went out.
        if response.body.contains("<Error>") {
            return Err(AwsError::parse_xml_error(500, &response.body));
        }
        Ok(())
    }

    async fn list_buckets(&self) -> AwsResult<Vec<String>> {
        let response = self.execute(&S3Request::new("GET"), true).await?;
        Ok(crate::error::xml_text_all(&response.body, "Name"))
    }
}

fn strip_quotes(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}
