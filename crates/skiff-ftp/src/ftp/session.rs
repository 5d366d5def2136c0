//! FTP session: connection lifecycle, working directory, listings and
//! server timezone detection.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{map_ftp_error, FtpErrorKind};
use crate::ftp::factory::{FtpParserFactory, PermissionProbe};
use crate::ftp::features::*;
use crate::ftp::parser::FtpParser;
use crate::ftp::timezone::{infer_timezones, wall_clock_ms};
use crate::ftp::types::{DataChannelMode, EntryKind, FtpEntry, FtpState};
use async_trait::async_trait;
use chrono_tz::Tz;
use skiff_core::feature::*;
use skiff_core::{
    AttributedList, BackgroundError, BackgroundResult, Feature, FeatureKind, FeatureType, Host,
    Path, PathAttributes, PathType, Session, SessionContext, SessionCore, SessionFactory,
};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::{MappedMutexGuard, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Parser built for the timezone it was created with.
struct ListingParser {
    timezone: Tz,
    parser: Arc<FtpParser>,
}

pub struct FtpSession {
    core: SessionCore,
    me: Weak<FtpSession>,
    client: tokio::sync::Mutex<Option<FtpClient>>,
    listing: Mutex<Option<ListingParser>>,
    factory: FtpParserFactory,
    permissions: PermissionProbe,
    cancel: Mutex<CancellationToken>,
    ftp_state: RwLock<FtpState>,
}

impl FtpSession {
    pub fn new(host: Host, context: SessionContext) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            core: SessionCore::new(host, context),
            me: me.clone(),
            client: tokio::sync::Mutex::new(None),
            listing: Mutex::new(None),
            factory: FtpParserFactory::new(),
            permissions: PermissionProbe::new(),
            cancel: Mutex::new(CancellationToken::new()),
            ftp_state: RwLock::new(FtpState::Closed),
        })
    }

    pub fn ftp_state(&self) -> FtpState {
        *self.ftp_state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_ftp_state(&self, state: FtpState) {
        *self.ftp_state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn permissions(&self) -> &PermissionProbe {
        &self.permissions
    }

    /// The control connection, or `TransportFailure` when not connected.
    pub(crate) async fn client(&self) -> BackgroundResult<MappedMutexGuard<'_, FtpClient>> {
        let guard = self.client.lock().await;
        MutexGuard::try_map(guard, |c| c.as_mut())
            .map_err(|_| BackgroundError::transport(format!("Not connected to {}", self.host())))
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Connect ──────────────────────────────────────────────────

    fn connect_mode(&self, host: &Host) -> DataChannelMode {
        match host.ftp_connect_mode {
            Some(mode) => mode.into(),
            None if self.core.preferences().ftp_connectmode_passive => DataChannelMode::Passive,
            None => DataChannelMode::Active,
        }
    }

    async fn open(&self, host: &Host) -> BackgroundResult<()> {
        let opening = self.core.status(
            "Opening {0} connection to {1}",
            &[host.protocol.name(), host.hostname.as_str()],
        );
        self.core.message(&opening);

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();

        let mut client = FtpClient::connect(
            &host.hostname,
            host.port,
            self.core.transcript(),
            token,
            self.core.preferences().connection_timeout(),
        )
        .await
        .map_err(map_ftp_error)?;
        self.set_ftp_state(FtpState::Connected);
        client.set_strict(true);
        client.set_mode(self.connect_mode(host));

        self.login(&mut client, host).await?;
        self.set_ftp_state(FtpState::Authenticated);

        if host.is_utf8() && self.core.preferences().ftp_command_utf8 {
            if let Err(e) = client.utf8().await {
                log::debug!("Server refused UTF-8 control channel: {}", e);
            }
        }
        *self.client.lock().await = Some(client);
        Ok(())
    }

    /// Log in, asking the login callback for new credentials once when the
    /// server rejects the first attempt.
    async fn login(&self, client: &mut FtpClient, host: &Host) -> BackgroundResult<()> {
        let mut credentials = host.credentials.clone();
        let mut retried = false;
        loop {
            let attempt = client.login(&credentials.username, credentials.secret()).await;
            let err = match attempt {
                Ok(()) => return Ok(()),
                Err(e) if e.kind == FtpErrorKind::AuthFailed => e,
                Err(e) => return Err(map_ftp_error(e)),
            };
            let login = &self.core.context().login;
            if retried {
                login.fail(host, &err.message);
                return Err(BackgroundError::login_failed(format!(
                    "Login {} with username {} failed",
                    host.hostname, credentials.username
                ))
                .with_detail(err.message.clone())
                .with_source(err));
            }
            retried = true;
            log::info!("Login to {} failed, asking for credentials", host);
            credentials = login.prompt(host, &err.message)?;
            self.core.set_credentials(credentials.clone());
        }
    }

    // ── Listing ──────────────────────────────────────────────────

    fn timezone(&self) -> Tz {
        self.core
            .host()
            .timezone
            .unwrap_or_else(|| self.core.preferences().default_timezone())
    }

    /// Listing parser for the current timezone, rebuilt when it changed.
    async fn parser(&self) -> BackgroundResult<Arc<FtpParser>> {
        let timezone = self.timezone();
        if let Some(ref cached) = *self.listing.lock().unwrap_or_else(PoisonError::into_inner) {
            if cached.timezone == timezone {
                return Ok(cached.parser.clone());
            }
        }
        let system = self.client().await?.system().await.map_err(map_ftp_error)?;
        let mut parser = self
            .factory
            .create(system.as_deref(), timezone)
            .map_err(|e| {
                BackgroundError::protocol(format!("No listing parser for {}", self.host()))
                    .with_detail(e.to_string())
                    .with_source(e)
            })?;
        if parser.is_configurable() {
            parser.configure(None);
        }
        let parser = Arc::new(parser);
        self.permissions.clear();
        *self.listing.lock().unwrap_or_else(PoisonError::into_inner) = Some(ListingParser {
            timezone,
            parser: parser.clone(),
        });
        Ok(parser)
    }

    /// Raw listing lines, `STAT` first when enabled, `LIST` otherwise or
    /// when the server refuses.
    async fn listing_lines(&self, directory: &Path, parser: &FtpParser) -> BackgroundResult<Vec<String>> {
        let now = self.core.context().clock.now_ms();
        if self.core.preferences().ftp_command_stat {
            let stat = self.client().await?.stat_list(directory.absolute()).await;
            match stat {
                Ok(lines) if lines.is_empty() || !parser.parse_listing(&lines, now).is_empty() => {
                    return Ok(lines)
                }
                Ok(_) => log::debug!("STAT listing not understood, retrying with LIST"),
                Err(e) if e.is_reply() => log::debug!("STAT listing failed: {}", e),
                Err(e) => return Err(map_ftp_error(e)),
            }
        }
        self.client()
            .await?
            .list(directory.absolute())
            .await
            .map_err(map_ftp_error)
    }

    pub(crate) async fn list_entries(&self, directory: &Path) -> BackgroundResult<Vec<FtpEntry>> {
        let parser = self.parser().await?;
        let lines = self.listing_lines(directory, &parser).await?;
        Ok(parser.parse_listing(&lines, self.core.context().clock.now_ms()))
    }

    pub(crate) async fn list_directory(&self, directory: &Path) -> BackgroundResult<AttributedList> {
        let entries = self.list_entries(directory).await?;
        let parser = self.parser().await?;
        let permissions = !entries.is_empty() && self.permissions.is_permission_supported(&parser);
        Ok(entries
            .into_iter()
            .map(|entry| to_path(directory, entry, permissions))
            .collect())
    }

    // ── Timezone detection ───────────────────────────────────────

    /// Candidate server zones from comparing the listing date of the first
    /// file in `directory` with its `MDTM` time. Empty when nothing can be
    /// concluded.
    pub async fn detect_timezones(&self, directory: &Path) -> Vec<Tz> {
        let default = self.core.preferences().default_timezone();
        let entries = match self.list_entries(directory).await {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Timezone detection failed to list {}: {}", directory.absolute(), e);
                return Vec::new();
            }
        };
        let Some((name, listed)) = entries
            .iter()
            .find(|e| e.is_file())
            .and_then(|e| e.modified.map(|m| (e.name.clone(), m)))
        else {
            log::info!("No file in {} to detect the server timezone", directory.absolute());
            return Vec::new();
        };
        let file = Path::child(directory, &name, PathType::FILE);
        let utc = match self.client().await {
            Ok(mut client) => client.mdtm(file.absolute()).await.map_err(map_ftp_error),
            Err(e) => Err(e),
        };
        match utc {
            Ok(utc) => infer_timezones(utc, wall_clock_ms(default, listed), default),
            Err(e) => {
                log::warn!("Timezone detection failed for {}: {}", file.absolute(), e);
                Vec::new()
            }
        }
    }

    // ── Raw commands ─────────────────────────────────────────────

    /// Send `command` verbatim and return the reply text.
    pub async fn send_command(&self, command: &str) -> BackgroundResult<String> {
        let resp = self
            .client()
            .await?
            .quote(command)
            .await
            .map_err(map_ftp_error)?;
        Ok(resp.text())
    }

    /// Server operating system from `SYST`.
    pub async fn identification(&self) -> BackgroundResult<Option<String>> {
        self.client().await?.system().await.map_err(map_ftp_error)
    }

    fn teardown(&self) {
        *self.listing.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.permissions.clear();
        self.set_ftp_state(FtpState::Closed);
    }
}

fn to_path(directory: &Path, entry: FtpEntry, permissions: bool) -> Path {
    let kind = match entry.kind {
        EntryKind::Directory => PathType::DIRECTORY,
        EntryKind::SymbolicLink => PathType::FILE | PathType::SYMBOLIC_LINK,
        EntryKind::File | EntryKind::Unknown => PathType::FILE,
    };
    let attributes = PathAttributes {
        size: entry.size,
        modification_date: entry.modified.unwrap_or(-1),
        permission: if permissions { entry.permission } else { None },
        owner: entry.owner,
        group: entry.group,
        link_target: entry.link_target,
        ..PathAttributes::default()
    };
    Path::child(directory, &entry.name, kind).with_attributes(attributes)
}

fn directory_kind(path: &Path) -> PathType {
    if path.is_root() {
        PathType::VOLUME | PathType::DIRECTORY
    } else {
        PathType::DIRECTORY
    }
}

#[async_trait]
impl Session for FtpSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    async fn connect(&self) -> BackgroundResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let host = self.core.host();
        self.core.will_open();
        match self.open(&host).await {
            Ok(()) => {
                self.core.did_open();
                Ok(())
            }
            Err(e) => {
                log::warn!("Connection to {} failed: {}", host, e);
                self.client.lock().await.take();
                self.teardown();
                self.core.reset();
                Err(e)
            }
        }
    }

    async fn probe(&self) -> BackgroundResult<()> {
        self.client().await?.noop().await.map_err(map_ftp_error)
    }

    async fn close(&self) {
        if !self.is_connected() {
            self.client.lock().await.take();
            self.teardown();
            self.core.reset();
            return;
        }
        self.core.will_close();
        let taken = self.client.lock().await.take();
        if let Some(mut client) = taken {
            if let Err(e) = client.quit().await {
                log::warn!("Error closing connection to {}: {}", self.host(), e);
            }
        }
        self.teardown();
        self.core.did_close();
    }

    async fn interrupt(&self) {
        // Aborts any command in flight so the client lock frees up.
        self.cancel_token().cancel();
        self.core.interrupted();
        self.core.will_close();
        self.core.did_close();
        self.client.lock().await.take();
        self.teardown();
    }

    fn lookup(&self, kind: FeatureKind) -> Option<Feature> {
        let session = self.me.clone();
        let feature = match kind {
            FeatureKind::List => <dyn ListService>::wrap(Arc::new(FtpListService::new(session))),
            FeatureKind::Delete => <dyn Delete>::wrap(Arc::new(FtpDelete::new(session))),
            FeatureKind::Move => <dyn Move>::wrap(Arc::new(FtpMove::new(session))),
            FeatureKind::Directory => <dyn Directory>::wrap(Arc::new(FtpDirectory::new(session))),
            FeatureKind::Touch => <dyn Touch>::wrap(Arc::new(FtpTouch::new(session))),
            FeatureKind::Read => <dyn Read>::wrap(Arc::new(FtpRead::new(session))),
            FeatureKind::Write => <dyn Write>::wrap(Arc::new(FtpWrite::new(session))),
            FeatureKind::Upload => <dyn Upload>::wrap(Arc::new(FtpUpload::new(session))),
            FeatureKind::Download => <dyn Download>::wrap(Arc::new(FtpDownload::new(session))),
            FeatureKind::AttributesFinder => {
                <dyn AttributesFinder>::wrap(Arc::new(FtpAttributesFinder::new(session)))
            }
            FeatureKind::Find => <dyn Find>::wrap(Arc::new(FtpFind::new(session))),
            _ => return None,
        };
        Some(feature)
    }

    async fn workdir(&self) -> BackgroundResult<Path> {
        if let Some(cached) = self.core.cached_workdir() {
            return Ok(cached);
        }
        let pwd = self.client().await?.pwd().await.map_err(map_ftp_error)?;
        let mut workdir = Path::new(&pwd, PathType::DIRECTORY);
        workdir.set_kind(directory_kind(&workdir));
        self.core.set_cached_workdir(Some(workdir.clone()));
        self.set_ftp_state(FtpState::Working);
        Ok(workdir)
    }

    async fn set_workdir(&self, directory: &Path) -> BackgroundResult<()> {
        if self.core.cached_workdir().as_ref() == Some(directory) {
            return Ok(());
        }
        self.client()
            .await?
            .cwd(directory.absolute())
            .await
            .map_err(map_ftp_error)?;
        let mut workdir = directory.clone();
        workdir.set_kind(directory_kind(directory));
        self.core.set_cached_workdir(Some(workdir));
        self.set_ftp_state(FtpState::Working);
        Ok(())
    }

    async fn mount(&self, directory: Option<&Path>) -> BackgroundResult<Path> {
        if let Some(directory) = directory {
            self.set_workdir(directory).await?;
        }
        let workdir = self.workdir().await?;
        if self.core.preferences().ftp_timezone_auto && self.core.host().timezone.is_none() {
            let zones = self.detect_timezones(&workdir).await;
            if let Some(timezone) = zones.first() {
                log::info!("Server timezone of {} detected as {}", self.host(), timezone);
                self.core.set_timezone(Some(*timezone));
                // Next listing rebuilds the parser for the new zone.
                *self.listing.lock().unwrap_or_else(PoisonError::into_inner) = None;
            }
        }
        Ok(workdir)
    }
}

/// Creates [`FtpSession`]s for the protocol catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpSessionFactory;

impl SessionFactory for FtpSessionFactory {
    fn create(&self, host: Host, context: SessionContext) -> BackgroundResult<Arc<dyn Session>> {
        Ok(FtpSession::new(host, context))
    }
}
