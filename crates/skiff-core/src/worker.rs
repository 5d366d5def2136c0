//! Background workers run against a session.

use crate::error::{BackgroundError, BackgroundResult};
use crate::feature::Headers;
use crate::listener::ProgressListener;
use crate::locale::{LocaleTable, DEFAULT_TABLE, INFO_TABLE, STATUS_TABLE};
use crate::metadata::MetadataOverwrite;
use crate::path::Path;
use crate::session::{get_feature, Session};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, cheap to clone into spawned tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(ConnectionCanceled)` once canceled.
    pub fn check(&self) -> BackgroundResult<()> {
        if self.is_canceled() {
            return Err(BackgroundError::canceled());
        }
        Ok(())
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    type Output: Send;

    async fn run(&self, session: &dyn Session) -> BackgroundResult<Self::Output>;

    /// Result reported when the worker never ran.
    fn initialize(&self) -> Self::Output;

    /// Status line describing what the worker does.
    fn activity(&self) -> String;

    fn cancel(&self);

    fn is_canceled(&self) -> bool;
}

/// Decides whether a change to a directory should also apply to its contents.
pub trait RecursiveCallback: Send + Sync {
    fn recurse(&self, directory: &Path, description: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct BooleanRecursiveCallback(pub bool);

impl RecursiveCallback for BooleanRecursiveCallback {
    fn recurse(&self, _directory: &Path, _description: &str) -> bool {
        self.0
    }
}

/// Selection summary used in activity lines: `None`, `name…` or
/// `name… (Multiple files) (n)`.
pub fn describe_files<'a>(locale: &LocaleTable, files: impl IntoIterator<Item = &'a Path>) -> String {
    let mut names: Vec<&Path> = files.into_iter().collect();
    names.sort_by(|a, b| a.absolute().cmp(b.absolute()));
    match names.as_slice() {
        [] => locale.localized("None", DEFAULT_TABLE),
        [single] => format!("{}…", single.name()),
        [first, ..] => format!(
            "{}… ({}) ({})",
            first.name(),
            locale.localized("Multiple files", DEFAULT_TABLE),
            names.len()
        ),
    }
}

/// Where a metadata key was seen for one selected path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KeyOrigin {
    /// Present in the original snapshot.
    old: bool,
    /// Present in the desired metadata.
    new: bool,
}

fn classify(
    original: &BTreeMap<String, String>,
    desired: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, KeyOrigin> {
    let mut keys: BTreeMap<String, KeyOrigin> = BTreeMap::new();
    for key in original.keys() {
        keys.entry(key.clone()).or_default().old = true;
    }
    for key in desired.keys() {
        keys.entry(key.clone()).or_default().new = true;
    }
    keys
}

/// Applies a [`MetadataOverwrite`] to the selected paths, and optionally to
/// the contents of selected directories.
pub struct WriteMetadataWorker {
    overwrite: MetadataOverwrite,
    callback: Arc<dyn RecursiveCallback>,
    listener: Arc<dyn ProgressListener>,
    locale: Arc<LocaleTable>,
    canceled: CancelFlag,
}

impl WriteMetadataWorker {
    pub fn new(
        overwrite: MetadataOverwrite,
        callback: Arc<dyn RecursiveCallback>,
        listener: Arc<dyn ProgressListener>,
        locale: Arc<LocaleTable>,
    ) -> Self {
        Self {
            overwrite,
            callback,
            listener,
            locale,
            canceled: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.canceled.clone()
    }

    fn selection(&self) -> Vec<(&Path, &BTreeMap<String, String>)> {
        let mut selection: Vec<_> = self.overwrite.original.iter().collect();
        selection.sort_by(|a, b| a.0.absolute().cmp(b.0.absolute()));
        selection
    }

    fn write<'a>(
        &'a self,
        session: &'a dyn Session,
        feature: &'a Arc<dyn Headers>,
        file: &'a Path,
        keys: &'a BTreeMap<String, KeyOrigin>,
    ) -> BoxFuture<'a, BackgroundResult<()>> {
        async move {
            self.canceled.check()?;
            let mut updated = file.attributes().metadata.clone();
            let mut changed = false;
            for (key, origin) in keys {
                if !origin.new {
                    updated.remove(key);
                    changed = true;
                    continue;
                }
                if let Some(Some(value)) = self.overwrite.metadata.get(key) {
                    if updated.get(key) != Some(value) {
                        updated.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
            }
            if changed {
                self.listener.message(&self.locale.format(
                    "Writing metadata of {0}",
                    STATUS_TABLE,
                    &[file.name()],
                ));
                self.canceled.check()?;
                feature.set_metadata(file, &updated).await?;
            } else {
                debug!("Metadata of {} unchanged", file);
            }
            if file.is_directory() {
                let description = self.locale.localized("Metadata", INFO_TABLE);
                if self.callback.recurse(file, &description) {
                    self.canceled.check()?;
                    let children = session.list(file, self.listener.as_ref()).await?;
                    for child in &children {
                        self.write(session, feature, child, keys).await?;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl Worker for WriteMetadataWorker {
    type Output = bool;

    async fn run(&self, session: &dyn Session) -> BackgroundResult<bool> {
        self.canceled.check()?;
        let feature = get_feature::<dyn Headers, _>(session).ok_or_else(|| {
            BackgroundError::unsupported(format!(
                "Metadata not supported by {}",
                session.host()
            ))
        })?;
        for (file, original) in self.selection() {
            self.canceled.check()?;
            let keys = classify(original, &self.overwrite.metadata);
            self.write(session, &feature, file, &keys).await?;
        }
        Ok(true)
    }

    fn initialize(&self) -> bool {
        false
    }

    fn activity(&self) -> String {
        let files = describe_files(&self.locale, self.overwrite.paths());
        self.locale
            .format("Writing metadata of {0}", STATUS_TABLE, &[files.as_str()])
    }

    fn cancel(&self) {
        self.canceled.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.canceled.is_canceled()
    }
}

/// Two workers are equal when they edit the same selection.
impl PartialEq for WriteMetadataWorker {
    fn eq(&self, other: &Self) -> bool {
        let mine: HashSet<&Path> = self.overwrite.paths().collect();
        let theirs: HashSet<&Path> = other.overwrite.paths().collect();
        mine == theirs
    }
}

impl Eq for WriteMetadataWorker {}

impl Hash for WriteMetadataWorker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (file, _) in self.selection() {
            file.hash(state);
        }
    }
}
