//! Connection target and credentials.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol tag. Selects the session factory in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Ftp,
    FtpTls,
    S3,
    Dropbox,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::FtpTls => "ftps",
            Protocol::S3 => "s3",
            Protocol::Dropbox => "dropbox",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::FtpTls => 21,
            Protocol::S3 | Protocol::Dropbox => 443,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Ftp => "FTP",
            Protocol::FtpTls => "FTP-SSL",
            Protocol::S3 => "S3",
            Protocol::Dropbox => "Dropbox",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "ftps" | "ftp-ssl" => Ok(Protocol::FtpTls),
            "s3" => Ok(Protocol::S3),
            "dropbox" => Ok(Protocol::Dropbox),
            other => Err(format!("Unknown protocol '{}'", other)),
        }
    }
}

/// FTP data connection mode. `None` on the host means "follow the global
/// passive preference".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FtpConnectMode {
    Passive,
    Active,
    ExtendedPassive,
    ExtendedActive,
}

/// Login credentials. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub username: String,
    secret: String,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub save: bool,
}

pub const ANONYMOUS_LOGIN: &str = "anonymous";

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            anonymous: false,
            save: false,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            username: ANONYMOUS_LOGIN.to_string(),
            secret: "skiff@example.net".to_string(),
            anonymous: true,
            save: false,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn set_secret(&mut self, secret: impl Into<String>) {
        self.secret = secret.into();
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous || self.username == ANONYMOUS_LOGIN
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"***")
            .field("anonymous", &self.anonymous)
            .field("save", &self.save)
            .finish()
    }
}

/// A bookmark: where to connect and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub protocol: Protocol,
    pub hostname: String,
    pub port: u16,
    /// Server timezone for listing dates. `None` means unknown.
    pub timezone: Option<Tz>,
    pub ftp_connect_mode: Option<FtpConnectMode>,
    pub encoding: String,
    pub credentials: Credentials,
    pub default_path: Option<String>,
}

impl Host {
    pub fn new(protocol: Protocol, hostname: impl Into<String>) -> Self {
        Self {
            protocol,
            hostname: hostname.into(),
            port: protocol.default_port(),
            timezone: None,
            ftp_connect_mode: None,
            encoding: "UTF-8".to_string(),
            credentials: Credentials::anonymous(),
            default_path: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = Some(timezone);
        self
    }

    pub fn with_connect_mode(mut self, mode: FtpConnectMode) -> Self {
        self.ftp_connect_mode = Some(mode);
        self
    }

    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = Some(path.into());
        self
    }

    pub fn is_utf8(&self) -> bool {
        self.encoding.eq_ignore_ascii_case("UTF-8") || self.encoding.eq_ignore_ascii_case("UTF8")
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.scheme(), self.hostname, self.port)
    }
}
