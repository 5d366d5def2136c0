use skiff_core::{Feature, FeatureKind, Path, SessionId};
use std::fmt;

/// An unlocked vault mounted at [`Vault::home`]. Features for paths inside
/// the vault are obtained through [`Vault::feature`], which may wrap the
/// session's own implementation (to encrypt names and contents) or replace it.
pub trait Vault: Send + Sync + fmt::Debug {
    fn home(&self) -> &Path;

    fn feature(&self, session: &SessionId, kind: FeatureKind, inner: Feature) -> Feature;

    /// Lock the vault. Called when it is deregistered.
    fn close(&self) {}
}

/// Stand-in for "no vault here": hands back the session's feature unchanged.
#[derive(Debug)]
pub struct NullVault {
    home: Path,
}

impl NullVault {
    pub fn new() -> Self {
        Self { home: Path::root() }
    }
}

impl Default for NullVault {
    fn default() -> Self {
        Self::new()
    }
}

impl Vault for NullVault {
    fn home(&self) -> &Path {
        &self.home
    }

    fn feature(&self, _session: &SessionId, _kind: FeatureKind, inner: Feature) -> Feature {
        inner
    }
}
