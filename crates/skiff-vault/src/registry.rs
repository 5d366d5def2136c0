//! Process-wide table of unlocked vaults, keyed by session and root path.

use crate::proxy::VaultRegistryFeature;
use crate::vault::{NullVault, Vault};
use log::{debug, info};
use skiff_core::{BackgroundError, BackgroundResult, Feature, FeatureDecorator, Path, SessionId};
use std::sync::{Arc, PoisonError, RwLock};

struct Registration {
    session: SessionId,
    root: Path,
    vault: Arc<dyn Vault>,
}

/// Registered vaults. Cloning yields another handle to the same table.
///
/// Lookups pick the vault with the longest root that contains the path;
/// when two roots are equal the later registration wins. Paths outside
/// every vault resolve to [`NullVault`].
#[derive(Clone)]
pub struct VaultRegistry {
    entries: Arc<RwLock<Vec<Registration>>>,
    null: Arc<dyn Vault>,
}

impl Default for VaultRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            null: Arc::new(NullVault::new()),
        }
    }

    /// Register `vault` for `session`. A vault with the same root replaces
    /// the earlier one; a vault nested in (or containing) another vault of the
    /// same session is rejected.
    pub fn add(&self, session: &SessionId, vault: Arc<dyn Vault>) -> BackgroundResult<()> {
        let root = vault.home().clone();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.iter().find(|e| {
            &e.session == session && (root.is_child_of(&e.root) || e.root.is_child_of(&root))
        }) {
            return Err(BackgroundError::interoperability(format!(
                "Vault {} overlaps vault {}",
                root, existing.root
            )));
        }
        if let Some(pos) = entries
            .iter()
            .position(|e| &e.session == session && e.root.absolute() == root.absolute())
        {
            let replaced = entries.remove(pos);
            debug!("Replace vault {:?} at {}", replaced.vault, root);
        }
        info!("Register vault at {} for session {}", root, session);
        entries.push(Registration {
            session: session.clone(),
            root,
            vault,
        });
        Ok(())
    }

    /// Deregister and close the vault mounted at `root`.
    pub fn remove(&self, session: &SessionId, root: &Path) -> Option<Arc<dyn Vault>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let pos = entries
            .iter()
            .position(|e| &e.session == session && e.root.absolute() == root.absolute())?;
        let removed = entries.remove(pos);
        removed.vault.close();
        Some(removed.vault)
    }

    /// Deregister and close every vault of `session`.
    pub fn clear(&self, session: &SessionId) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|e| {
            if &e.session == session {
                info!("Close vault at {}", e.root);
                e.vault.close();
                false
            } else {
                true
            }
        });
    }

    pub fn find(&self, session: &SessionId, path: &Path) -> Arc<dyn Vault> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<&Registration> = None;
        for entry in entries
            .iter()
            .filter(|e| &e.session == session && path.is_self_or_child_of(&e.root))
        {
            match best {
                Some(b) if b.root.absolute().len() > entry.root.absolute().len() => {}
                _ => best = Some(entry),
            }
        }
        best.map(|e| e.vault.clone())
            .unwrap_or_else(|| self.null.clone())
    }

    /// Whether `path` lies inside a registered vault of `session`.
    pub fn contains(&self, session: &SessionId, path: &Path) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .any(|e| &e.session == session && path.is_self_or_child_of(&e.root))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

macro_rules! decorate {
    ($feature:expr, $session:expr, $registry:expr;
     route $($routed:ident),*;
     pass $($plain:ident),*) => {
        match $feature {
            $(Feature::$routed(inner) => Feature::$routed(Arc::new(
                VaultRegistryFeature::new($session.clone(), inner, $registry.clone()),
            )),)*
            $(Feature::$plain(inner) => Feature::$plain(inner),)*
        }
    };
}

impl FeatureDecorator for VaultRegistry {
    fn decorate(&self, session: &SessionId, feature: Feature) -> Feature {
        decorate!(feature, session, self;
            route List, Read, Write, Upload, Download, Delete, Move, Copy, Touch,
                Directory, Headers, Compress, PromptUrlProvider, AclPermission,
                Versioning, Encryption, Logging, Redundancy, Find, AttributesFinder;
            pass Quota)
    }

    fn session_closed(&self, session: &SessionId) {
        self.clear(session);
    }
}
