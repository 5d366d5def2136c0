//! # FTP
//!
//! FTP (RFC 959) with extensions:
//! - **RFC 3659**: MLSD, SIZE, MDTM
//! - **RFC 2389**: FEAT negotiation
//! - **RFC 2428**: EPSV / EPRT (IPv6-ready)
//!
//! Architecture:
//! - `types`: protocol state, replies, listing entries
//! - `error`: FTP-specific error type and its mapping
//! - `protocol`: low-level command/response codec
//! - `client`: stateful FTP client (login, PWD, LIST, MDTM, etc.)
//! - `transfer`: data channel management (PASV/EPSV/PORT/EPRT)
//! - `parser`: Unix/Windows/Netware/Rumpus/MLSD listing parsers
//! - `factory`: parser selection from `SYST`, permission probe
//! - `timezone`: server timezone inference
//! - `session`: `FtpSession` lifecycle and listings
//! - `features`: capabilities handed out by the session

pub mod client;
pub mod error;
pub mod factory;
pub mod features;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod timezone;
pub mod transfer;
pub mod types;

pub use error::{map_ftp_error, FtpError, FtpErrorKind, FtpResult};
pub use factory::{FtpParserFactory, ParserError, PermissionProbe};
pub use parser::{FtpParser, ParserConfig, ParserKind};
pub use session::{FtpSession, FtpSessionFactory};
pub use types::*;
