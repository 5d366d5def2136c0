//! Capability traits a session may offer, and the typed lookup over them.
//!
//! A session exposes each capability as a [`Feature`], a tagged handle to a
//! trait object. Callers ask for a capability by its trait type:
//!
//! ```ignore
//! let headers = get_feature::<dyn Headers, _>(session.as_ref());
//! ```

use crate::archive::Archive;
use crate::error::BackgroundResult;
use crate::listener::{PasswordCallback, ProgressListener, TranscriptListener};
use crate::path::{AttributedList, Path, PathAttributes};
use crate::session::SessionId;
use crate::transfer::TransferStatus;
use crate::url::DescriptiveUrl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path as LocalPath;
use std::sync::{Arc, PoisonError, RwLock};

// ── Capability traits ────────────────────────────────────────────────

#[async_trait]
pub trait ListService: Send + Sync {
    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<AttributedList>;
}

#[async_trait]
pub trait Read: Send + Sync {
    async fn read(&self, file: &Path, status: &TransferStatus) -> BackgroundResult<Vec<u8>>;
}

#[async_trait]
pub trait Write: Send + Sync {
    async fn write(
        &self,
        file: &Path,
        data: Vec<u8>,
        status: &TransferStatus,
    ) -> BackgroundResult<PathAttributes>;
}

#[async_trait]
pub trait Upload: Send + Sync {
    /// Upload the local file to `file`. Implementations may record the
    /// checksum they sent on `status`.
    async fn upload(
        &self,
        file: &Path,
        local: &LocalPath,
        status: &mut TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<PathAttributes>;
}

#[async_trait]
pub trait Download: Send + Sync {
    async fn download(
        &self,
        file: &Path,
        local: &LocalPath,
        status: &TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<()>;
}

#[async_trait]
pub trait Delete: Send + Sync {
    async fn delete(&self, file: &Path, listener: &dyn ProgressListener) -> BackgroundResult<()>;
}

#[async_trait]
pub trait Move: Send + Sync {
    async fn rename(&self, file: &Path, target: &Path) -> BackgroundResult<Path>;
}

#[async_trait]
pub trait CopyFeature: Send + Sync {
    async fn copy(&self, source: &Path, target: &Path) -> BackgroundResult<Path>;
}

#[async_trait]
pub trait Touch: Send + Sync {
    async fn touch(&self, file: &Path, status: &TransferStatus) -> BackgroundResult<Path>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn mkdir(&self, folder: &Path, status: &TransferStatus) -> BackgroundResult<Path>;
}

/// Custom key/value metadata (HTTP headers on object stores).
#[async_trait]
pub trait Headers: Send + Sync {
    async fn get_metadata(&self, file: &Path) -> BackgroundResult<BTreeMap<String, String>>;

    async fn set_metadata(
        &self,
        file: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> BackgroundResult<()>;
}

#[async_trait]
pub trait Compress: Send + Sync {
    async fn archive(
        &self,
        archive: &Archive,
        workdir: &Path,
        files: &[Path],
        listener: &dyn ProgressListener,
        transcript: &dyn TranscriptListener,
    ) -> BackgroundResult<()>;

    async fn unarchive(
        &self,
        archive: &Archive,
        file: &Path,
        listener: &dyn ProgressListener,
        transcript: &dyn TranscriptListener,
    ) -> BackgroundResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareKind {
    Download,
    Upload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareOptions {
    pub password: Option<String>,
}

/// Creates shareable links, possibly prompting for a password.
#[async_trait]
pub trait PromptUrlProvider: Send + Sync {
    fn is_supported(&self, file: &Path, kind: ShareKind) -> bool;

    async fn to_download_url(
        &self,
        file: &Path,
        options: &ShareOptions,
        prompt: &dyn PasswordCallback,
    ) -> BackgroundResult<DescriptiveUrl>;

    async fn to_upload_url(
        &self,
        file: &Path,
        options: &ShareOptions,
        prompt: &dyn PasswordCallback,
    ) -> BackgroundResult<DescriptiveUrl>;
}

/// Grantee to granted roles.
pub type Acl = BTreeMap<String, BTreeSet<String>>;

#[async_trait]
pub trait AclPermission: Send + Sync {
    async fn get_permission(&self, file: &Path) -> BackgroundResult<Acl>;
    async fn set_permission(&self, file: &Path, acl: &Acl) -> BackgroundResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub used: i64,
    pub available: i64,
}

#[async_trait]
pub trait Quota: Send + Sync {
    async fn get(&self) -> BackgroundResult<Space>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningConfiguration {
    pub enabled: bool,
    pub multifactor: bool,
}

#[async_trait]
pub trait Versioning: Send + Sync {
    async fn configuration(&self, container: &Path) -> BackgroundResult<VersioningConfiguration>;
    async fn set_configuration(
        &self,
        container: &Path,
        configuration: VersioningConfiguration,
    ) -> BackgroundResult<()>;
    async fn revert(&self, file: &Path) -> BackgroundResult<()>;
}

#[async_trait]
pub trait Encryption: Send + Sync {
    /// Server side encryption algorithm of `file`, `None` when unencrypted.
    async fn encryption(&self, file: &Path) -> BackgroundResult<Option<String>>;
    async fn set_encryption(&self, file: &Path, algorithm: Option<&str>) -> BackgroundResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfiguration {
    pub enabled: bool,
    pub target: Option<String>,
}

#[async_trait]
pub trait Logging: Send + Sync {
    async fn configuration(&self, container: &Path) -> BackgroundResult<LoggingConfiguration>;
    async fn set_configuration(
        &self,
        container: &Path,
        configuration: &LoggingConfiguration,
    ) -> BackgroundResult<()>;
}

/// Storage class.
#[async_trait]
pub trait Redundancy: Send + Sync {
    async fn class(&self, file: &Path) -> BackgroundResult<Option<String>>;
    async fn set_class(&self, file: &Path, class: &str) -> BackgroundResult<()>;
}

#[async_trait]
pub trait Find: Send + Sync {
    async fn find(&self, file: &Path) -> BackgroundResult<bool>;
}

#[async_trait]
pub trait AttributesFinder: Send + Sync {
    async fn find(&self, file: &Path) -> BackgroundResult<PathAttributes>;
}

// ── Feature kinds and handles ────────────────────────────────────────

/// Marker tying a capability trait object to its [`FeatureKind`].
pub trait FeatureType: Send + Sync + 'static {
    const KIND: FeatureKind;
    fn wrap(handle: Arc<Self>) -> Feature;
    fn unwrap(feature: Feature) -> Option<Arc<Self>>;
}

macro_rules! features {
    ($($kind:ident => $trait:ident),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum FeatureKind {
            $($kind),*
        }

        impl FeatureKind {
            pub const ALL: &'static [FeatureKind] = &[$(FeatureKind::$kind),*];

            pub fn name(&self) -> &'static str {
                match self {
                    $(FeatureKind::$kind => stringify!($kind)),*
                }
            }
        }

        /// Handle to one capability of a session.
        #[derive(Clone)]
        pub enum Feature {
            $($kind(Arc<dyn $trait>)),*
        }

        impl Feature {
            pub fn kind(&self) -> FeatureKind {
                match self {
                    $(Feature::$kind(_) => FeatureKind::$kind),*
                }
            }
        }

        $(
            impl FeatureType for dyn $trait {
                const KIND: FeatureKind = FeatureKind::$kind;

                fn wrap(handle: Arc<Self>) -> Feature {
                    Feature::$kind(handle)
                }

                fn unwrap(feature: Feature) -> Option<Arc<Self>> {
                    match feature {
                        Feature::$kind(handle) => Some(handle),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

features! {
    List => ListService,
    Read => Read,
    Write => Write,
    Upload => Upload,
    Download => Download,
    Delete => Delete,
    Move => Move,
    Copy => CopyFeature,
    Touch => Touch,
    Directory => Directory,
    Headers => Headers,
    Compress => Compress,
    PromptUrlProvider => PromptUrlProvider,
    AclPermission => AclPermission,
    Quota => Quota,
    Versioning => Versioning,
    Encryption => Encryption,
    Logging => Logging,
    Redundancy => Redundancy,
    Find => Find,
    AttributesFinder => AttributesFinder,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for FeatureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureKind::ALL
            .iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown feature '{}'", s))
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Feature::{}", self.kind())
    }
}

// ── Cache and decoration ─────────────────────────────────────────────

/// Per-session memo of feature lookups, including negative answers.
#[derive(Default)]
pub struct FeatureCache {
    entries: RwLock<HashMap<FeatureKind, Option<Feature>>>,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with<F>(&self, kind: FeatureKind, lookup: F) -> Option<Feature>
    where
        F: FnOnce() -> Option<Feature>,
    {
        if let Some(cached) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            return cached.clone();
        }
        let found = lookup();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_insert(found)
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
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

/// Hook that may wrap every feature handed out by a session.
pub trait FeatureDecorator: Send + Sync {
    fn decorate(&self, session: &SessionId, feature: Feature) -> Feature;

    /// The session closed; drop anything registered for it.
    fn session_closed(&self, _session: &SessionId) {}
}
