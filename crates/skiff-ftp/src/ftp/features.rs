//! Capabilities an [`FtpSession`] offers. Each holds a weak reference to
//! its session so a cached feature never keeps a closed session alive.

use crate::ftp::error::{map_ftp_error, FtpErrorKind};
use crate::ftp::session::FtpSession;
use async_trait::async_trait;
use skiff_core::feature::{
    AttributesFinder, Delete, Directory, Download, Find, ListService, Move, Read, Touch, Upload,
    Write,
};
use skiff_core::listener::ProgressListener;
use skiff_core::transfer::TransferStatus;
use skiff_core::{
    AttributedList, BackgroundError, BackgroundResult, ErrorKind, Path, PathAttributes, PathType,
    Session,
};
use std::path::Path as LocalPath;
use std::sync::{Arc, Weak};

macro_rules! ftp_features {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub struct $name {
                session: Weak<FtpSession>,
            }

            impl $name {
                pub fn new(session: Weak<FtpSession>) -> Self {
                    Self { session }
                }

                fn session(&self) -> BackgroundResult<Arc<FtpSession>> {
                    self.session
                        .upgrade()
                        .ok_or_else(|| BackgroundError::transport("Session is gone"))
                }
            }
        )*
    };
}

ftp_features! {
    /// `STAT` or `LIST` directory listing.
    FtpListService,
    /// `DELE` for files, `RMD` for directories.
    FtpDelete,
    /// `RNFR` / `RNTO`.
    FtpMove,
    FtpDirectory,
    /// Creates an empty file with `STOR`.
    FtpTouch,
    FtpRead,
    FtpWrite,
    FtpUpload,
    FtpDownload,
    /// `SIZE` and `MDTM` for files, the parent listing for directories.
    FtpAttributesFinder,
    FtpFind,
}

#[async_trait]
impl ListService for FtpListService {
    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<AttributedList> {
        let session = self.session()?;
        listener.message(&session.core().status("Listing directory {0}", &[directory.name()]));
        session.list_directory(directory).await
    }
}

#[async_trait]
impl Delete for FtpDelete {
    async fn delete(&self, file: &Path, listener: &dyn ProgressListener) -> BackgroundResult<()> {
        let session = self.session()?;
        listener.message(&session.core().status("Deleting {0}", &[file.name()]));
        let mut client = session.client().await?;
        let result = if file.is_directory() {
            client.rmd(file.absolute()).await
        } else {
            client.dele(file.absolute()).await
        };
        result.map_err(map_ftp_error)
    }
}

#[async_trait]
impl Move for FtpMove {
    async fn rename(&self, file: &Path, target: &Path) -> BackgroundResult<Path> {
        let session = self.session()?;
        session
            .client()
            .await?
            .rename(file.absolute(), target.absolute())
            .await
            .map_err(map_ftp_error)?;
        Ok(Path::new(target.absolute(), file.kind()).with_attributes(file.attributes().clone()))
    }
}

#[async_trait]
impl Directory for FtpDirectory {
    async fn mkdir(&self, folder: &Path, _status: &TransferStatus) -> BackgroundResult<Path> {
        let session = self.session()?;
        session
            .client()
            .await?
            .mkd(folder.absolute())
            .await
            .map_err(map_ftp_error)?;
        Ok(Path::new(folder.absolute(), PathType::DIRECTORY))
    }
}

#[async_trait]
impl Touch for FtpTouch {
    async fn touch(&self, file: &Path, _status: &TransferStatus) -> BackgroundResult<Path> {
        let session = self.session()?;
        session
            .client()
            .await?
            .store(file.absolute(), &[], false)
            .await
            .map_err(map_ftp_error)?;
        let attributes = PathAttributes {
            size: 0,
            ..PathAttributes::default()
        };
        Ok(Path::new(file.absolute(), PathType::FILE).with_attributes(attributes))
    }
}

#[async_trait]
impl Read for FtpRead {
    async fn read(&self, file: &Path, status: &TransferStatus) -> BackgroundResult<Vec<u8>> {
        let session = self.session()?;
        let mut data = session
            .client()
            .await?
            .retrieve(file.absolute())
            .await
            .map_err(map_ftp_error)?;
        if status.offset > 0 {
            let offset = (status.offset as usize).min(data.len());
            data.drain(..offset);
        }
        Ok(data)
    }
}

#[async_trait]
impl Write for FtpWrite {
    async fn write(
        &self,
        file: &Path,
        data: Vec<u8>,
        status: &TransferStatus,
    ) -> BackgroundResult<PathAttributes> {
        let session = self.session()?;
        session
            .client()
            .await?
            .store(file.absolute(), &data, status.append)
            .await
            .map_err(map_ftp_error)?;
        Ok(PathAttributes {
            size: data.len() as i64,
            ..PathAttributes::default()
        })
    }
}

#[async_trait]
impl Upload for FtpUpload {
    async fn upload(
        &self,
        file: &Path,
        local: &LocalPath,
        status: &mut TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<PathAttributes> {
        let session = self.session()?;
        let data = tokio::fs::read(local).await?;
        status.length = data.len() as i64;
        listener.message(&session.core().status("Uploading {0}", &[file.name()]));
        session
            .client()
            .await?
            .store(file.absolute(), &data, status.append)
            .await
            .map_err(map_ftp_error)?;
        Ok(PathAttributes {
            size: status.length,
            ..PathAttributes::default()
        })
    }
}

#[async_trait]
impl Download for FtpDownload {
    async fn download(
        &self,
        file: &Path,
        local: &LocalPath,
        _status: &TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<()> {
        let session = self.session()?;
        listener.message(&session.core().status("Downloading {0}", &[file.name()]));
        let data = session
            .client()
            .await?
            .retrieve(file.absolute())
            .await
            .map_err(map_ftp_error)?;
        tokio::fs::write(local, data).await?;
        Ok(())
    }
}

/// Entry for `file` in its parent's listing.
async fn listed(session: &FtpSession, file: &Path) -> BackgroundResult<Path> {
    let parent = file
        .parent()
        .ok_or_else(|| BackgroundError::not_found(file.absolute().to_string()))?;
    session
        .list_directory(&parent)
        .await?
        .into_iter()
        .find(|p| p.name() == file.name())
        .ok_or_else(|| BackgroundError::not_found(format!("{} not found", file.absolute())))
}

#[async_trait]
impl AttributesFinder for FtpAttributesFinder {
    async fn find(&self, file: &Path) -> BackgroundResult<PathAttributes> {
        let session = self.session()?;
        if file.is_root() {
            return Ok(PathAttributes::default());
        }
        if !file.is_file() {
            return Ok(listed(&session, file).await?.attributes().clone());
        }
        let mut client = session.client().await?;
        let size = client.size(file.absolute()).await.map_err(map_ftp_error)?;
        let modified = match client.mdtm(file.absolute()).await {
            Ok(ms) => ms,
            Err(e) if e.is_reply() && e.kind != FtpErrorKind::NotFound => {
                log::debug!("MDTM unavailable for {}: {}", file.absolute(), e);
                -1
            }
            Err(e) => return Err(map_ftp_error(e)),
        };
        Ok(PathAttributes {
            size,
            modification_date: modified,
            ..PathAttributes::default()
        })
    }
}

#[async_trait]
impl Find for FtpFind {
    async fn find(&self, file: &Path) -> BackgroundResult<bool> {
        let session = self.session()?;
        if file.is_root() {
            return Ok(true);
        }
        match listed(&session, file).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
