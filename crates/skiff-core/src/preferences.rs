//! User preferences, addressed by dotted keys.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_signature_version() -> String {
    "AWS4HMACSHA256".to_string()
}

fn default_link_ttl() -> u64 {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(rename = "ftp.timezone.auto", default)]
    pub ftp_timezone_auto: bool,
    #[serde(rename = "ftp.timezone.default", default = "default_timezone")]
    pub ftp_timezone_default: String,
    #[serde(rename = "ftp.connectmode.passive", default = "default_true")]
    pub ftp_connectmode_passive: bool,
    #[serde(rename = "ftp.command.stat", default = "default_true")]
    pub ftp_command_stat: bool,
    #[serde(rename = "ftp.command.utf8", default = "default_true")]
    pub ftp_command_utf8: bool,
    #[serde(rename = "connection.timeout.seconds", default = "default_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(rename = "s3.upload.md5", default = "default_true")]
    pub s3_upload_md5: bool,
    #[serde(rename = "s3.signature.version", default = "default_signature_version")]
    pub s3_signature_version: String,
    #[serde(rename = "dropbox.link.ttl.hours", default = "default_link_ttl")]
    pub dropbox_link_ttl_hours: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            ftp_timezone_auto: false,
            ftp_timezone_default: default_timezone(),
            ftp_connectmode_passive: true,
            ftp_command_stat: true,
            ftp_command_utf8: true,
            connection_timeout_seconds: default_timeout(),
            s3_upload_md5: true,
            s3_signature_version: default_signature_version(),
            dropbox_link_ttl_hours: default_link_ttl(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("failed to read preferences: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid preferences: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown preference '{0}'")]
    UnknownKey(String),
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}

impl Preferences {
    pub fn from_json_str(json: &str) -> Result<Self, PreferencesError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, PreferencesError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Boolean value of `key`, `false` for unknown or non-boolean keys.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get_property(key)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn get_property(&self, key: &str) -> Option<String> {
        let value = match key {
            "ftp.timezone.auto" => self.ftp_timezone_auto.to_string(),
            "ftp.timezone.default" => self.ftp_timezone_default.clone(),
            "ftp.connectmode.passive" => self.ftp_connectmode_passive.to_string(),
            "ftp.command.stat" => self.ftp_command_stat.to_string(),
            "ftp.command.utf8" => self.ftp_command_utf8.to_string(),
            "connection.timeout.seconds" => self.connection_timeout_seconds.to_string(),
            "s3.upload.md5" => self.s3_upload_md5.to_string(),
            "s3.signature.version" => self.s3_signature_version.clone(),
            "dropbox.link.ttl.hours" => self.dropbox_link_ttl_hours.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), PreferencesError> {
        let invalid = || PreferencesError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let as_bool = || value.parse::<bool>().map_err(|_| invalid());
        let as_u64 = || value.parse::<u64>().map_err(|_| invalid());
        match key {
            "ftp.timezone.auto" => self.ftp_timezone_auto = as_bool()?,
            "ftp.timezone.default" => {
                value.parse::<Tz>().map_err(|_| invalid())?;
                self.ftp_timezone_default = value.to_string();
            }
            "ftp.connectmode.passive" => self.ftp_connectmode_passive = as_bool()?,
            "ftp.command.stat" => self.ftp_command_stat = as_bool()?,
            "ftp.command.utf8" => self.ftp_command_utf8 = as_bool()?,
            "connection.timeout.seconds" => self.connection_timeout_seconds = as_u64()?,
            "s3.upload.md5" => self.s3_upload_md5 = as_bool()?,
            "s3.signature.version" => self.s3_signature_version = value.to_string(),
            "dropbox.link.ttl.hours" => self.dropbox_link_ttl_hours = as_u64()?,
            other => return Err(PreferencesError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Default server timezone, falling back to UTC for unknown ids.
    pub fn default_timezone(&self) -> Tz {
        match self.ftp_timezone_default.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                log::warn!(
                    "Unknown timezone '{}' in preferences, using UTC",
                    self.ftp_timezone_default
                );
                Tz::UTC
            }
        }
    }

    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_timeout_seconds)
    }
}
