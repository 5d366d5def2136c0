//! # skiff-ftp
//!
//! FTP session for skiff. See [`ftp`] for the module layout.

pub mod ftp;

pub use ftp::{FtpSession, FtpSessionFactory};
