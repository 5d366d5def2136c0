//! Session trait and the lifecycle helper every protocol session embeds.

use crate::date::{ChronoDateFormatter, Clock, SystemClock, UserDateFormatter};
use crate::error::{BackgroundError, BackgroundResult};
use crate::feature::{Feature, FeatureCache, FeatureDecorator, FeatureKind, FeatureType, ListService};
use crate::host::{Credentials, Host};
use crate::listener::{
    ConnectionListener, DisabledLoginCallback, DisabledProgressListener,
    DisabledTranscriptListener, ListenerSet, LoginCallback, ProgressListener,
    TranscriptListener,
};
use crate::locale::{LocaleTable, STATUS_TABLE};
use crate::path::{AttributedList, Path};
use crate::preferences::Preferences;
use async_trait::async_trait;
use chrono_tz::Tz;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Process-unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
    Interrupted,
}

/// Collaborators handed to a session at construction.
#[derive(Clone)]
pub struct SessionContext {
    pub preferences: Arc<Preferences>,
    pub locale: Arc<LocaleTable>,
    pub formatter: Arc<dyn UserDateFormatter>,
    pub clock: Arc<dyn Clock>,
    pub progress: Arc<dyn ProgressListener>,
    pub transcript: Arc<dyn TranscriptListener>,
    pub connection: ListenerSet,
    pub login: Arc<dyn LoginCallback>,
    pub decorator: Option<Arc<dyn FeatureDecorator>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            preferences: Arc::new(Preferences::default()),
            locale: Arc::new(LocaleTable::new()),
            formatter: Arc::new(ChronoDateFormatter::default()),
            clock: Arc::new(SystemClock),
            progress: Arc::new(DisabledProgressListener),
            transcript: Arc::new(DisabledTranscriptListener),
            connection: ListenerSet::new(),
            login: Arc::new(DisabledLoginCallback),
            decorator: None,
        }
    }
}

impl SessionContext {
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = Arc::new(preferences);
        self
    }

    pub fn with_locale(mut self, locale: LocaleTable) -> Self {
        self.locale = Arc::new(locale);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn UserDateFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptListener>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn with_connection_listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.connection.add(listener);
        self
    }

    pub fn with_login(mut self, login: Arc<dyn LoginCallback>) -> Self {
        self.login = login;
        self
    }

    pub fn with_decorator(mut self, decorator: Arc<dyn FeatureDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }
}

/// Shared session state: host, connection state, workdir and feature cache.
///
/// State transitions follow
/// `Closed → Opening → Open → Closing → Closed`, and any state may move to
/// `Interrupted`, which always ends in `Closed`.
pub struct SessionCore {
    id: SessionId,
    host: RwLock<Host>,
    state: RwLock<ConnectionState>,
    workdir: RwLock<Option<Path>>,
    features: FeatureCache,
    context: SessionContext,
}

impl SessionCore {
    pub fn new(host: Host, context: SessionContext) -> Self {
        Self {
            id: SessionId::new(),
            host: RwLock::new(host),
            state: RwLock::new(ConnectionState::Closed),
            workdir: RwLock::new(None),
            features: FeatureCache::new(),
            context,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn host(&self) -> Host {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remember an inferred server timezone on the host.
    pub fn set_timezone(&self, timezone: Option<Tz>) {
        self.host
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .timezone = timezone;
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.host
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials = credentials;
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn preferences(&self) -> &Preferences {
        &self.context.preferences
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!("Session {} state {:?} -> {:?}", self.id, *state, next);
            *state = next;
        }
    }

    // ── Lifecycle notifications ──────────────────────────────────

    pub fn will_open(&self) {
        self.set_state(ConnectionState::Opening);
        self.context.connection.will_open(&self.host());
    }

    pub fn did_open(&self) {
        self.set_state(ConnectionState::Open);
        info!("Connected to {}", self.host());
        self.context.connection.did_open(&self.host());
    }

    pub fn will_close(&self) {
        if self.state() != ConnectionState::Interrupted {
            self.set_state(ConnectionState::Closing);
        }
        self.context.connection.will_close(&self.host());
    }

    /// Reached on every path out of a connection: cached features and the
    /// workdir are discarded. Decorators are told the session is gone only
    /// after an orderly close; an interrupted session may reconnect and keeps
    /// its vaults.
    pub fn did_close(&self) {
        let interrupted = self.state() == ConnectionState::Interrupted;
        self.reset();
        if !interrupted {
            if let Some(ref decorator) = self.context.decorator {
                decorator.session_closed(&self.id);
            }
        }
        self.context.connection.did_close(&self.host());
    }

    pub fn interrupted(&self) {
        self.set_state(ConnectionState::Interrupted);
    }

    /// Back to `Closed` without notifying listeners, after a failed connect.
    pub fn reset(&self) {
        self.features.clear();
        *self.workdir.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.set_state(ConnectionState::Closed);
    }

    // ── Listener helpers ─────────────────────────────────────────

    pub fn message(&self, message: &str) {
        self.context.progress.message(message);
    }

    pub fn transcript(&self) -> Arc<dyn TranscriptListener> {
        self.context.transcript.clone()
    }

    /// Localized status text with positional arguments.
    pub fn status(&self, key: &str, args: &[&str]) -> String {
        self.context.locale.format(key, STATUS_TABLE, args)
    }

    pub fn localized(&self, key: &str, table: &str) -> String {
        self.context.locale.localized(key, table)
    }

    // ── Workdir cache ────────────────────────────────────────────

    pub fn cached_workdir(&self) -> Option<Path> {
        self.workdir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_cached_workdir(&self, workdir: Option<Path>) {
        *self.workdir.write().unwrap_or_else(PoisonError::into_inner) = workdir;
    }

    // ── Features ─────────────────────────────────────────────────

    /// Cached, decorated feature lookup. Outside `Open` nothing is offered.
    pub fn feature<F>(&self, kind: FeatureKind, lookup: F, fallback: Option<Feature>) -> Option<Feature>
    where
        F: FnOnce(FeatureKind) -> Option<Feature>,
    {
        if !self.is_connected() {
            return None;
        }
        let found = self
            .features
            .get_or_insert_with(kind, || lookup(kind))
            .or(fallback)?;
        Some(match self.context.decorator {
            Some(ref decorator) => decorator.decorate(&self.id, found),
            None => found,
        })
    }

    pub fn cached_feature_count(&self) -> usize {
        self.features.len()
    }
}

/// A connection to a remote host.
#[async_trait]
pub trait Session: Send + Sync {
    fn core(&self) -> &SessionCore;

    fn id(&self) -> SessionId {
        self.core().id().clone()
    }

    fn host(&self) -> Host {
        self.core().host()
    }

    fn state(&self) -> ConnectionState {
        self.core().state()
    }

    fn is_connected(&self) -> bool {
        self.core().is_connected()
    }

    /// Open the connection and log in. A no-op when already open.
    async fn connect(&self) -> BackgroundResult<()>;

    /// Cheap liveness probe used by [`Session::check`].
    async fn probe(&self) -> BackgroundResult<()> {
        Ok(())
    }

    /// Make sure the connection is usable, reconnecting once when the probe
    /// fails.
    async fn check(&self) -> BackgroundResult<()> {
        if !self.is_connected() {
            return self.connect().await;
        }
        if let Err(e) = self.probe().await {
            info!("Connection check failed for {}: {}", self.host(), e);
            self.interrupt().await;
            return self.connect().await;
        }
        Ok(())
    }

    /// Orderly shutdown. Never fails; problems are logged.
    async fn close(&self);

    /// Abort the connection from any task. Always ends in `Closed`.
    async fn interrupt(&self);

    /// Protocol-provided feature for `kind`, uncached and undecorated.
    fn lookup(&self, kind: FeatureKind) -> Option<Feature>;

    fn feature(&self, kind: FeatureKind) -> Option<Feature> {
        self.core().feature(kind, |k| self.lookup(k), None)
    }

    fn feature_or(&self, kind: FeatureKind, fallback: Option<Feature>) -> Option<Feature> {
        self.core().feature(kind, |k| self.lookup(k), fallback)
    }

    async fn workdir(&self) -> BackgroundResult<Path>;

    async fn set_workdir(&self, directory: &Path) -> BackgroundResult<()> {
        self.core().set_cached_workdir(Some(directory.clone()));
        Ok(())
    }

    /// Change into `directory` (or the default directory) and return the
    /// resulting working directory.
    async fn mount(&self, directory: Option<&Path>) -> BackgroundResult<Path> {
        if let Some(directory) = directory {
            self.set_workdir(directory).await?;
        }
        self.workdir().await
    }

    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<AttributedList> {
        let service = get_feature::<dyn ListService, _>(self).ok_or_else(|| {
            BackgroundError::unsupported(format!("Listing not supported by {}", self.host()))
        })?;
        service.list(directory, listener).await
    }
}

/// Typed feature lookup: `get_feature::<dyn Headers, _>(session)`.
pub fn get_feature<F, S>(session: &S) -> Option<Arc<F>>
where
    F: FeatureType + ?Sized,
    S: Session + ?Sized,
{
    session.feature(F::KIND).and_then(F::unwrap)
}

/// Like [`get_feature`] but with a fallback implementation used when the
/// session offers none.
pub fn get_feature_or<F, S>(session: &S, fallback: Arc<F>) -> Option<Arc<F>>
where
    F: FeatureType + ?Sized,
    S: Session + ?Sized,
{
    session
        .feature_or(F::KIND, Some(F::wrap(fallback)))
        .and_then(F::unwrap)
}
