//! # skiff-dropbox
//!
//! Dropbox API v2 session for skiff:
//!
//! - `client`: bearer-token RPC client with rate-limit retries
//! - `provider`: temporary download and upload links
//! - `session`: token validation and feature lookup
//! - `error`: Dropbox failures mapped onto the skiff error taxonomy

pub mod client;
pub mod error;
pub mod provider;
pub mod session;
pub mod types;

pub use client::{DropboxClient, DropboxFiles};
pub use error::{map_dropbox_error, DropboxError};
pub use provider::DropboxUrlProvider;
pub use session::{DropboxSession, DropboxSessionFactory};
