//! Feature proxy that picks, per call, the vault owning the path argument.

use crate::registry::VaultRegistry;
use async_trait::async_trait;
use log::warn;
use skiff_core::archive::Archive;
use skiff_core::feature::{
    Acl, AclPermission, AttributesFinder, Compress, CopyFeature, Delete, Directory, Download,
    Encryption, Find, Headers, ListService, Logging, LoggingConfiguration, Move,
    PromptUrlProvider, Read, Redundancy, ShareKind, ShareOptions, Touch, Upload, Versioning,
    VersioningConfiguration, Write,
};
use skiff_core::listener::{PasswordCallback, ProgressListener, TranscriptListener};
use skiff_core::transfer::TransferStatus;
use skiff_core::url::DescriptiveUrl;
use skiff_core::{AttributedList, BackgroundResult, FeatureType, Path, PathAttributes, SessionId};
use std::collections::BTreeMap;
use std::path::Path as LocalPath;
use std::sync::Arc;

pub struct VaultRegistryFeature<F: ?Sized> {
    session: SessionId,
    inner: Arc<F>,
    registry: VaultRegistry,
}

impl<F: FeatureType + ?Sized> VaultRegistryFeature<F> {
    pub fn new(session: SessionId, inner: Arc<F>, registry: VaultRegistry) -> Self {
        Self {
            session,
            inner,
            registry,
        }
    }

    /// Implementation to use for an operation on `path`.
    fn route(&self, path: &Path) -> Arc<F> {
        let vault = self.registry.find(&self.session, path);
        let feature = vault.feature(&self.session, F::KIND, F::wrap(self.inner.clone()));
        match F::unwrap(feature) {
            Some(routed) => routed,
            None => {
                warn!("Vault {:?} returned wrong handle for {}", vault, F::KIND);
                self.inner.clone()
            }
        }
    }
}

#[async_trait]
impl ListService for VaultRegistryFeature<dyn ListService> {
    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<AttributedList> {
        self.route(directory).list(directory, listener).await
    }
}

#[async_trait]
impl Read for VaultRegistryFeature<dyn Read> {
    async fn read(&self, file: &Path, status: &TransferStatus) -> BackgroundResult<Vec<u8>> {
        self.route(file).read(file, status).await
    }
}

#[async_trait]
impl Write for VaultRegistryFeature<dyn Write> {
    async fn write(
        &self,
        file: &Path,
        data: Vec<u8>,
        status: &TransferStatus,
    ) -> BackgroundResult<PathAttributes> {
        self.route(file).write(file, data, status).await
    }
}

#[async_trait]
impl Upload for VaultRegistryFeature<dyn Upload> {
    async fn upload(
        &self,
        file: &Path,
        local: &LocalPath,
        status: &mut TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<PathAttributes> {
        self.route(file).upload(file, local, status, listener).await
    }
}

#[async_trait]
impl Download for VaultRegistryFeature<dyn Download> {
    async fn download(
        &self,
        file: &Path,
        local: &LocalPath,
        status: &TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<()> {
        self.route(file).download(file, local, status, listener).await
    }
}

#[async_trait]
impl Delete for VaultRegistryFeature<dyn Delete> {
    async fn delete(&self, file: &Path, listener: &dyn ProgressListener) -> BackgroundResult<()> {
        self.route(file).delete(file, listener).await
    }
}

#[async_trait]
impl Move for VaultRegistryFeature<dyn Move> {
    async fn rename(&self, file: &Path, target: &Path) -> BackgroundResult<Path> {
        self.route(file).rename(file, target).await
    }
}

#[async_trait]
impl CopyFeature for VaultRegistryFeature<dyn CopyFeature> {
    async fn copy(&self, source: &Path, target: &Path) -> BackgroundResult<Path> {
        self.route(source).copy(source, target).await
    }
}

#[async_trait]
impl Touch for VaultRegistryFeature<dyn Touch> {
    async fn touch(&self, file: &Path, status: &TransferStatus) -> BackgroundResult<Path> {
        self.route(file).touch(file, status).await
    }
}

#[async_trait]
impl Directory for VaultRegistryFeature<dyn Directory> {
    async fn mkdir(&self, folder: &Path, status: &TransferStatus) -> BackgroundResult<Path> {
        self.route(folder).mkdir(folder, status).await
    }
}

#[async_trait]
impl Headers for VaultRegistryFeature<dyn Headers> {
    async fn get_metadata(&self, file: &Path) -> BackgroundResult<BTreeMap<String, String>> {
        self.route(file).get_metadata(file).await
    }

    async fn set_metadata(
        &self,
        file: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> BackgroundResult<()> {
        self.route(file).set_metadata(file, metadata).await
    }
}

#[async_trait]
impl Compress for VaultRegistryFeature<dyn Compress> {
    async fn archive(
        &self,
        archive: &Archive,
        workdir: &Path,
        files: &[Path],
        listener: &dyn ProgressListener,
        transcript: &dyn TranscriptListener,
    ) -> BackgroundResult<()> {
        self.route(workdir)
            .archive(archive, workdir, files, listener, transcript)
            .await
    }

    async fn unarchive(
        &self,
        archive: &Archive,
        file: &Path,
        listener: &dyn ProgressListener,
        transcript: &dyn TranscriptListener,
    ) -> BackgroundResult<()> {
        self.route(file)
            .unarchive(archive, file, listener, transcript)
            .await
    }
}

#[async_trait]
impl PromptUrlProvider for VaultRegistryFeature<dyn PromptUrlProvider> {
    fn is_supported(&self, file: &Path, kind: ShareKind) -> bool {
        self.route(file).is_supported(file, kind)
    }

    async fn to_download_url(
        &self,
        file: &Path,
        options: &ShareOptions,
        prompt: &dyn PasswordCallback,
    ) -> BackgroundResult<DescriptiveUrl> {
        self.route(file).to_download_url(file, options, prompt).await
    }

    async fn to_upload_url(
        &self,
        file: &Path,
        options: &ShareOptions,
        prompt: &dyn PasswordCallback,
    ) -> BackgroundResult<DescriptiveUrl> {
        self.route(file).to_upload_url(file, options, prompt).await
    }
}

#[async_trait]
impl AclPermission for VaultRegistryFeature<dyn AclPermission> {
    async fn get_permission(&self, file: &Path) -> BackgroundResult<Acl> {
        self.route(file).get_permission(file).await
    }

    async fn set_permission(&self, file: &Path, acl: &Acl) -> BackgroundResult<()> {
        self.route(file).set_permission(file, acl).await
    }
}

#[async_trait]
impl Versioning for VaultRegistryFeature<dyn Versioning> {
    async fn configuration(&self, container: &Path) -> BackgroundResult<VersioningConfiguration> {
        self.route(container).configuration(container).await
    }

    async fn set_configuration(
        &self,
        container: &Path,
        configuration: VersioningConfiguration,
    ) -> BackgroundResult<()> {
        self.route(container)
            .set_configuration(container, configuration)
            .await
    }

    async fn revert(&self, file: &Path) -> BackgroundResult<()> {
        self.route(file).revert(file).await
    }
}

#[async_trait]
impl Encryption for VaultRegistryFeature<dyn Encryption> {
    async fn encryption(&self, file: &Path) -> BackgroundResult<Option<String>> {
        self.route(file).encryption(file).await
    }

    async fn set_encryption(&self, file: &Path, algorithm: Option<&str>) -> BackgroundResult<()> {
        self.route(file).set_encryption(file, algorithm).await
    }
}

#[async_trait]
impl Logging for VaultRegistryFeature<dyn Logging> {
    async fn configuration(&self, container: &Path) -> BackgroundResult<LoggingConfiguration> {
        self.route(container).configuration(container).await
    }

    async fn set_configuration(
        &self,
        container: &Path,
        configuration: &LoggingConfiguration,
    ) -> BackgroundResult<()> {
        self.route(container)
            .set_configuration(container, configuration)
            .await
    }
}

#[async_trait]
impl Redundancy for VaultRegistryFeature<dyn Redundancy> {
    async fn class(&self, file: &Path) -> BackgroundResult<Option<String>> {
        self.route(file).class(file).await
    }

    async fn set_class(&self, file: &Path, class: &str) -> BackgroundResult<()> {
        self.route(file).set_class(file, class).await
    }
}

#[async_trait]
impl Find for VaultRegistryFeature<dyn Find> {
    async fn find(&self, file: &Path) -> BackgroundResult<bool> {
        self.route(file).find(file).await
    }
}

#[async_trait]
impl AttributesFinder for VaultRegistryFeature<dyn AttributesFinder> {
    async fn find(&self, file: &Path) -> BackgroundResult<PathAttributes> {
        self.route(file).find(file).await
    }
}
