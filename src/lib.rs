//! # skiff
//!
//! Session management and feature dispatch for remote file browsers. This
//! crate wires the protocol crates into one catalog and drives sessions
//! headlessly through [`SessionService`].

pub mod logging;
pub mod service;

pub use service::{SessionInfo, SessionService, SessionServiceState};
pub use skiff_core as core;
pub use skiff_vault as vault;

use skiff_core::{Protocol, ProtocolCatalog};
use skiff_dropbox::DropboxSessionFactory;
use skiff_ftp::FtpSessionFactory;
use skiff_s3::S3SessionFactory;
use std::sync::Arc;

/// Catalog with every protocol this build speaks.
pub fn default_catalog() -> ProtocolCatalog {
    let mut catalog = ProtocolCatalog::new();
    catalog.register(Protocol::Ftp, Arc::new(FtpSessionFactory));
    catalog.register(Protocol::Dropbox, Arc::new(DropboxSessionFactory));
    catalog.register(Protocol::S3, Arc::new(S3SessionFactory));
    catalog
}
