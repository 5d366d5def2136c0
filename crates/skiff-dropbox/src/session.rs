//! Dropbox session. The OAuth access token travels as the credential
//! secret; connecting validates it against `users/get_current_account`.

use crate::client::{DropboxClient, DropboxFiles};
use crate::error::map_dropbox_error;
use crate::provider::DropboxUrlProvider;
use async_trait::async_trait;
use skiff_core::feature::PromptUrlProvider;
use skiff_core::{
    BackgroundError, BackgroundResult, ErrorKind, Feature, FeatureKind, FeatureType, Host, Path,
    PathType, Session, SessionContext, SessionCore, SessionFactory,
};
use std::sync::{Arc, PoisonError, RwLock};

pub struct DropboxSession {
    core: SessionCore,
    api_base: Option<String>,
    /// Client used instead of building one from the token.
    preset: Option<Arc<dyn DropboxFiles>>,
    files: RwLock<Option<Arc<dyn DropboxFiles>>>,
}

impl DropboxSession {
    pub fn new(host: Host, context: SessionContext) -> Self {
        Self {
            core: SessionCore::new(host, context),
            api_base: None,
            preset: None,
            files: RwLock::new(None),
        }
    }

    /// Session talking to a custom RPC base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_files(mut self, files: Arc<dyn DropboxFiles>) -> Self {
        self.preset = Some(files);
        self
    }

    /// The API client, or `TransportFailure` when not connected.
    pub fn files(&self) -> BackgroundResult<Arc<dyn DropboxFiles>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackgroundError::transport(format!("Not connected to {}", self.host())))
    }

    fn build(&self, token: &str) -> BackgroundResult<Arc<dyn DropboxFiles>> {
        if let Some(ref preset) = self.preset {
            return Ok(preset.clone());
        }
        let mut client = DropboxClient::new(token, self.core.preferences().connection_timeout())
            .map_err(map_dropbox_error)?;
        if let Some(ref base) = self.api_base {
            client = client.with_api_base(base);
        }
        log::debug!("Built {:?}", client);
        Ok(Arc::new(client))
    }

    /// Validate the token, prompting once for a new one when Dropbox
    /// rejects it (or none is configured).
    async fn authenticate(&self, host: &Host) -> BackgroundResult<Arc<dyn DropboxFiles>> {
        let mut credentials = host.credentials.clone();
        let mut retried = false;
        loop {
            let attempt = if credentials.anonymous || credentials.secret().is_empty() {
                BackgroundError::login_failed(format!("No access token for {}", host.hostname))
            } else {
                match self.build(credentials.secret()) {
                    Ok(files) => match files.current_account().await {
                        Ok(account) => {
                            log::info!(
                                "Authenticated to Dropbox as {} ({})",
                                account.name.display_name,
                                account.account_id
                            );
                            return Ok(files);
                        }
                        Err(e) => map_dropbox_error(e),
                    },
                    Err(e) => e,
                }
            };
            if attempt.kind != ErrorKind::LoginFailed {
                return Err(attempt);
            }
            let login = &self.core.context().login;
            if retried {
                login.fail(host, &attempt.message);
                return Err(BackgroundError::login_failed(format!(
                    "Login {} failed",
                    host.hostname
                ))
                .with_detail(attempt.message.clone())
                .with_source(attempt));
            }
            retried = true;
            log::info!("No usable access token for {}: {}", host, attempt.message);
            credentials = login.prompt(host, &attempt.message)?;
            self.core.set_credentials(credentials.clone());
        }
    }

    fn teardown(&self) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl Session for DropboxSession {
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
            Ok(files) => {
                *self.files.write().unwrap_or_else(PoisonError::into_inner) = Some(files);
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
        self.files()?
            .current_account()
            .await
            .map(|_| ())
            .map_err(map_dropbox_error)
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
        match kind {
            FeatureKind::PromptUrlProvider => {
                let files = self.files().ok()?;
                let provider = DropboxUrlProvider::new(files, self.core.context());
                Some(<dyn PromptUrlProvider>::wrap(Arc::new(provider)))
            }
            _ => None,
        }
    }

    async fn workdir(&self) -> BackgroundResult<Path> {
        if let Some(cached) = self.core.cached_workdir() {
            return Ok(cached);
        }
        let home = self.host().default_path.unwrap_or_else(|| "/".to_string());
        let kind = if home == "/" {
            PathType::VOLUME | PathType::DIRECTORY
        } else {
            PathType::DIRECTORY
        };
        let workdir = Path::new(home, kind);
        self.core.set_cached_workdir(Some(workdir.clone()));
        Ok(workdir)
    }
}

/// Creates [`DropboxSession`]s for the protocol catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropboxSessionFactory;

impl SessionFactory for DropboxSessionFactory {
    fn create(&self, host: Host, context: SessionContext) -> BackgroundResult<Arc<dyn Session>> {
        Ok(Arc::new(DropboxSession::new(host, context)))
    }
}
