//! Headless session driver: open sessions by host, address them by id,
//! ask for features and run operations through them.

use serde::{Deserialize, Serialize};
use skiff_core::feature::Headers;
use skiff_core::listener::ProgressListener;
use skiff_core::metadata::MetadataOverwrite;
use skiff_core::worker::{BooleanRecursiveCallback, Worker, WriteMetadataWorker};
use skiff_core::{
    get_feature, AttributedList, BackgroundError, BackgroundResult, ConnectionState, ErrorKind,
    FeatureKind, Host, Path, Protocol, ProtocolCatalog, Session, SessionContext, SessionId,
};
use skiff_vault::{Vault, VaultRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SessionServiceState = Arc<Mutex<SessionService>>;

/// Summary of an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub protocol: Protocol,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub state: ConnectionState,
}

impl SessionInfo {
    fn of(session: &dyn Session) -> Self {
        let host = session.host();
        Self {
            id: session.id(),
            protocol: host.protocol,
            hostname: host.hostname,
            port: host.port,
            username: host.credentials.username,
            state: session.state(),
        }
    }
}

pub struct SessionService {
    catalog: ProtocolCatalog,
    registry: Arc<VaultRegistry>,
    context: SessionContext,
    sessions: HashMap<SessionId, Arc<dyn Session>>,
}

impl SessionService {
    /// Service creating sessions from `catalog`. Every session gets
    /// `context` with the service's vault registry as feature decorator.
    pub fn new(catalog: ProtocolCatalog, context: SessionContext) -> SessionServiceState {
        let registry = Arc::new(VaultRegistry::new());
        let context = context.with_decorator(registry.clone());
        Arc::new(Mutex::new(Self {
            catalog,
            registry,
            context,
            sessions: HashMap::new(),
        }))
    }

    pub fn registry(&self) -> Arc<VaultRegistry> {
        self.registry.clone()
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.catalog.protocols()
    }

    // ── Session management ──────────────────────────────────────────

    /// Create a session for `host` and connect it.
    pub async fn connect(&mut self, host: Host) -> BackgroundResult<SessionId> {
        let session = self.catalog.create(host, self.context.clone())?;
        session.connect().await?;
        let id = session.id();
        log::info!("Session {} connected to {}", id, session.host());
        self.sessions.insert(id.clone(), session);
        Ok(id)
    }

    pub fn session(&self, id: &SessionId) -> BackgroundResult<Arc<dyn Session>> {
        self.sessions
            .get(id)
            .cloned()
            .ok_or_else(|| BackgroundError::new(ErrorKind::NotFound, format!("Session {} not found", id)))
    }

    pub fn info(&self, id: &SessionId) -> BackgroundResult<SessionInfo> {
        Ok(SessionInfo::of(self.session(id)?.as_ref()))
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .values()
            .map(|s| SessionInfo::of(s.as_ref()))
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Close and forget the session. Its vaults are deregistered.
    pub async fn close(&mut self, id: &SessionId) -> BackgroundResult<()> {
        let session = self.sessions.remove(id).ok_or_else(|| {
            BackgroundError::new(ErrorKind::NotFound, format!("Session {} not found", id))
        })?;
        session.close().await;
        self.registry.clear(id);
        log::info!("Session {} closed", id);
        Ok(())
    }

    pub async fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.close(&id).await {
                log::warn!("Failed to close session {}: {}", id, e);
            }
        }
    }

    // ── Features and operations ─────────────────────────────────────

    /// Whether the session offers `kind`.
    pub fn feature(&self, id: &SessionId, kind: FeatureKind) -> BackgroundResult<bool> {
        Ok(self.session(id)?.feature(kind).is_some())
    }

    pub async fn workdir(&self, id: &SessionId) -> BackgroundResult<Path> {
        let session = self.session(id)?;
        session.check().await?;
        session.workdir().await
    }

    pub async fn list(
        &self,
        id: &SessionId,
        directory: &Path,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<AttributedList> {
        let session = self.session(id)?;
        session.check().await?;
        session.list(directory, listener).await
    }

    /// Run a [`WriteMetadataWorker`] for `overwrite` against the session.
    pub async fn write_metadata(
        &self,
        id: &SessionId,
        overwrite: MetadataOverwrite,
        recursive: bool,
    ) -> BackgroundResult<bool> {
        let session = self.session(id)?;
        session.check().await?;
        if get_feature::<dyn Headers, _>(session.as_ref()).is_none() {
            return Err(BackgroundError::unsupported(format!(
                "Metadata not supported by {}",
                session.host()
            )));
        }
        let worker = WriteMetadataWorker::new(
            overwrite,
            Arc::new(BooleanRecursiveCallback(recursive)),
            self.context.progress.clone(),
            self.context.locale.clone(),
        );
        log::debug!("{}", worker.activity());
        worker.run(session.as_ref()).await
    }

    /// Mount `vault` in the session; features for paths below its home are
    /// routed through it.
    pub fn add_vault(&self, id: &SessionId, vault: Arc<dyn Vault>) -> BackgroundResult<()> {
        self.session(id)?;
        self.registry.add(id, vault)
    }
}
