//! S3 session. The access key id travels as the username and the secret
//! access key as the credential secret; connecting lists the buckets to
//! validate them.

use crate::client::{S3Client, S3RestClient, DEFAULT_REGION};
use crate::error::map_s3_error;
use crate::features::{S3MetadataFeature, S3SingleUploadService, S3WriteFeature};
use crate::signing::{AwsCredentials, SignatureSelector, SignatureVersion};
use async_trait::async_trait;
use skiff_core::feature::{Headers, Upload, Write};
use skiff_core::{
    BackgroundError, BackgroundResult, ErrorKind, Feature, FeatureKind, FeatureType, Host, Path,
    PathType, Session, SessionContext, SessionCore, SessionFactory,
};
use std::sync::{Arc, PoisonError, RwLock, Weak};

type ClientBuilder = Box<dyn Fn(Arc<SignatureSelector>) -> Arc<dyn S3Client> + Send + Sync>;

pub struct S3Session {
    core: SessionCore,
    me: Weak<S3Session>,
    /// Signature scheme shared with the client, which may switch it.
    selector: Arc<SignatureSelector>,
    /// Builds the client instead of deriving one from the credentials.
    preset: Option<ClientBuilder>,
    client: RwLock<Option<Arc<dyn S3Client>>>,
}

impl S3Session {
    pub fn new(host: Host, context: SessionContext) -> Arc<Self> {
        Self::create(host, context, None)
    }

    /// Session whose client comes from `build`, handed the shared
    /// signature selector.
    pub fn with_client<F>(host: Host, context: SessionContext, build: F) -> Arc<Self>
    where
        F: Fn(Arc<SignatureSelector>) -> Arc<dyn S3Client> + Send + Sync + 'static,
    {
        Self::create(host, context, Some(Box::new(build)))
    }

    fn create(host: Host, context: SessionContext, preset: Option<ClientBuilder>) -> Arc<Self> {
        let configured = &context.preferences.s3_signature_version;
        let version = configured.parse::<SignatureVersion>().unwrap_or_else(|e| {
            log::warn!("{}, using {}", e, SignatureVersion::Aws4HmacSha256);
            SignatureVersion::Aws4HmacSha256
        });
        Arc::new_cyclic(|me| Self {
            core: SessionCore::new(host, context),
            me: me.clone(),
            selector: Arc::new(SignatureSelector::new(version)),
            preset,
            client: RwLock::new(None),
        })
    }

    /// Current authentication scheme. Re-read after a failed request to
    /// see whether the client switched it.
    pub fn signature_version(&self) -> SignatureVersion {
        self.selector.get()
    }

    pub fn selector(&self) -> Arc<SignatureSelector> {
        self.selector.clone()
    }

    /// The REST client, or `TransportFailure` when not connected.
    pub fn client(&self) -> BackgroundResult<Arc<dyn S3Client>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackgroundError::transport(format!("Not connected to {}", self.host())))
    }

    /// Split `/bucket/key/in/bucket` into bucket and key. The key is empty
    /// for the bucket itself.
    pub fn container(&self, file: &Path) -> BackgroundResult<(String, String)> {
        let trimmed = file.absolute().trim_start_matches('/');
        let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        if bucket.is_empty() {
            return Err(BackgroundError::new(
                ErrorKind::NotFound,
                format!("No bucket in {}", file.absolute()),
            ));
        }
        Ok((bucket.to_string(), key.to_string()))
    }

    /// Bucket and non-empty object key of `file`.
    pub fn object(&self, file: &Path) -> BackgroundResult<(String, String)> {
        let (bucket, key) = self.container(file)?;
        if key.is_empty() {
            return Err(BackgroundError::unsupported(format!(
                "{} is a bucket, not an object",
                file.absolute()
            )));
        }
        Ok((bucket, key))
    }

    fn build(&self, host: &Host) -> BackgroundResult<Arc<dyn S3Client>> {
        if let Some(ref build) = self.preset {
            return Ok(build(self.selector.clone()));
        }
        let credentials = AwsCredentials {
            access_key_id: host.credentials.username.clone(),
            secret_access_key: host.credentials.secret().to_string(),
            session_token: None,
        };
        let client = S3RestClient::new(
            credentials,
            self.selector.clone(),
            self.core.preferences().connection_timeout(),
        )
        .map_err(map_s3_error)?
        .with_endpoint(&endpoint(host))
        .with_region(DEFAULT_REGION);
        log::debug!("Built {:?}", client);
        Ok(Arc::new(client))
    }

    /// List buckets with the configured keys, prompting once for new ones
    /// when S3 rejects them.
    async fn authenticate(&self, host: &Host) -> BackgroundResult<Arc<dyn S3Client>> {
        let mut host = host.clone();
        let mut retried = false;
        loop {
            let client = self.build(&host)?;
            let attempt = match client.list_buckets().await {
                Ok(buckets) => {
                    log::info!(
                        "Authenticated to {} with {} bucket(s)",
                        host.hostname,
                        buckets.len()
                    );
                    return Ok(client);
                }
                Err(e) => map_s3_error(e),
            };
            if attempt.kind != ErrorKind::LoginFailed {
                return Err(attempt);
            }
            let login = &self.core.context().login;
            if retried {
                login.fail(&host, &attempt.message);
                return Err(BackgroundError::login_failed(format!(
                    "Login {} failed",
                    host.hostname
                ))
                .with_detail(attempt.message.clone())
                .with_source(attempt));
            }
            retried = true;
            log::info!("S3 rejected the access keys for {}", host);
            let credentials = login.prompt(&host, &attempt.message)?;
            self.core.set_credentials(credentials.clone());
            host.credentials = credentials;
        }
    }

    fn teardown(&self) {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Service URL for `host`; plain HTTP unless the port is 443.
fn endpoint(host: &Host) -> String {
    match host.port {
        443 => format!("https://{}", host.hostname),
        port => format!("http://{}:{}", host.hostname, port),
    }
}

#[async_trait]
impl Session for S3Session {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    async fn connect(&self) -> BackgroundResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let host = self.host();
        self.core.will_open();
        self.core.message(&self.core.status(
            "Opening {0} connection to {1}",
            &[host.protocol.name(), host.hostname.as_str()],
        ));
        match self.authenticate(&host).await {
            Ok(client) => {
                *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
                self.core.did_open();
                Ok(())
            }
            Err(e) => {
                log::warn!("Connection to {} failed: {}", host, e);
                self.teardown();
                self.core.reset();
                Err(e)
            }
        }
    }

    async fn probe(&self) -> BackgroundResult<()> {
        self.client()?
            .list_buckets()
            .await
            .map(|_| ())
            .map_err(map_s3_error)
    }

    async fn close(&self) {
        if !self.is_connected() {
            self.teardown();
            self.core.reset();
            return;
        }
        self.core.will_close();
        self.teardown();
        self.core.did_close();
    }

    async fn interrupt(&self) {
        self.core.interrupted();
        self.core.will_close();
        self.core.did_close();
        self.teardown();
    }

    fn lookup(&self, kind: FeatureKind) -> Option<Feature> {
        let session = self.me.clone();
        let feature = match kind {
            FeatureKind::Upload => <dyn Upload>::wrap(Arc::new(S3SingleUploadService::new(session))),
            FeatureKind::Write => <dyn Write>::wrap(Arc::new(S3WriteFeature::new(session))),
            FeatureKind::Headers => <dyn Headers>::wrap(Arc::new(S3MetadataFeature::new(session))),
            _ => return None,
        };
        Some(feature)
    }

    async fn workdir(&self) -> BackgroundResult<Path> {
        if let Some(cached) = self.core.cached_workdir() {
            return Ok(cached);
        }
        let workdir = match self.host().default_path {
            Some(path) if path != "/" => Path::new(path, PathType::DIRECTORY),
            _ => Path::new("/", PathType::VOLUME | PathType::DIRECTORY),
        };
        self.core.set_cached_workdir(Some(workdir.clone()));
        Ok(workdir)
    }
}

/// Creates [`S3Session`]s for the protocol catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3SessionFactory;

impl SessionFactory for S3SessionFactory {
    fn create(&self, host: Host, context: SessionContext) -> BackgroundResult<Arc<dyn Session>> {
        Ok(S3Session::new(host, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockS3Client;
    use crate::error::AwsError;
    use skiff_core::host::Credentials;
    use skiff_core::listener::LoginCallback;
    use skiff_core::{get_feature, ConnectionState, Preferences, Protocol};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn host() -> Host {
        Host::new(Protocol::S3, "s3.amazonaws.com")
            .with_credentials(Credentials::new("AKIDEXAMPLE", "secret"))
    }

    fn listing() -> MockS3Client {
        let mut client = MockS3Client::new();
        client
            .expect_list_buckets()
            .returning(|| Ok(vec!["photos".to_string()]));
        client
    }

    fn session_with(client: MockS3Client, context: SessionContext) -> Arc<S3Session> {
        let client: Arc<dyn S3Client> = Arc::new(client);
        S3Session::with_client(host(), context, move |_| client.clone())
    }

    struct CountingLogin(AtomicUsize);

    impl LoginCallback for CountingLogin {
        fn prompt(&self, _host: &Host, _reason: &str) -> BackgroundResult<Credentials> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials::new("AKIDOTHER", "other"))
        }
    }

    #[tokio::test]
    async fn connect_offers_object_features() {
        let session = session_with(listing(), SessionContext::default());
        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Open);
        assert!(get_feature::<dyn Upload, _>(session.as_ref()).is_some());
        assert!(get_feature::<dyn Write, _>(session.as_ref()).is_some());
        assert!(get_feature::<dyn Headers, _>(session.as_ref()).is_some());
        assert!(session.feature(FeatureKind::PromptUrlProvider).is_none());
    }

    #[tokio::test]
    async fn rejected_keys_prompt_once() {
        let mut client = MockS3Client::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        client.expect_list_buckets().returning(move || {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AwsError::new("InvalidAccessKeyId", "The key does not exist", 403))
            } else {
                Ok(Vec::new())
            }
        });
        let login = Arc::new(CountingLogin(AtomicUsize::new(0)));
        let session = session_with(client, SessionContext::default().with_login(login.clone()));

        session.connect().await.unwrap();
        assert_eq!(login.0.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.host().credentials.username, "AKIDOTHER");
    }

    #[tokio::test]
    async fn access_denied_is_not_a_login_failure() {
        let mut client = MockS3Client::new();
        client
            .expect_list_buckets()
            .times(1)
            .returning(|| Err(AwsError::new("AccessDenied", "Access Denied", 403)));
        let session = session_with(client, SessionContext::default());
        let err = session.connect().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AccessDenied);
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[test]
    fn signature_version_from_preferences() {
        let prefs = Preferences {
            s3_signature_version: "AWS2".into(),
            ..Preferences::default()
        };
        let session = S3Session::new(host(), SessionContext::default().with_preferences(prefs));
        assert_eq!(session.signature_version(), SignatureVersion::Aws2);
        assert_eq!(
            S3Session::new(host(), SessionContext::default()).signature_version(),
            SignatureVersion::Aws4HmacSha256
        );
    }

    #[test]
    fn paths_split_into_bucket_and_key() {
        let session = S3Session::new(host(), SessionContext::default());
        let file = Path::new("/photos/2023/cat.jpg", PathType::FILE);
        assert_eq!(
            session.object(&file).unwrap(),
            ("photos".to_string(), "2023/cat.jpg".to_string())
        );
        let bucket = Path::new("/photos", PathType::DIRECTORY | PathType::VOLUME);
        assert_eq!(session.container(&bucket).unwrap().1, "");
        assert_eq!(session.object(&bucket).unwrap_err().kind, ErrorKind::Unsupported);
        assert_eq!(session.container(&Path::root()).unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn workdir_is_root_volume() {
        let session = session_with(listing(), SessionContext::default());
        session.connect().await.unwrap();
        let workdir = session.workdir().await.unwrap();
        assert!(workdir.is_root());
        assert!(workdir.is_volume());
    }

    #[tokio::test]
    async fn close_drops_client() {
        let session = session_with(listing(), SessionContext::default());
        session.connect().await.unwrap();
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(session.client().is_err());
    }

    #[test]
    fn endpoint_scheme_follows_port() {
        assert_eq!(endpoint(&host()), "https://s3.amazonaws.com");
        assert_eq!(
            endpoint(&Host::new(Protocol::S3, "localhost").with_port(9000)),
            "http://localhost:9000"
        );
    }
}
