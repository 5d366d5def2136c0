//! Shared types for the FTP crate.

use serde::{Deserialize, Serialize};
use skiff_core::host::FtpConnectMode;
use skiff_core::Permission;

// ─── Protocol state ──────────────────────────────────────────────────

/// Where the FTP conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FtpState {
    Closed,
    /// Control connection open, not logged in yet.
    Connected,
    Authenticated,
    /// Logged in and the working directory is known.
    Working,
}

/// Data connection set-up (RFC 959 + RFC 2428).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl Default for DataChannelMode {
    fn default() -> Self {
        Self::Passive
    }
}

impl From<FtpConnectMode> for DataChannelMode {
    fn from(mode: FtpConnectMode) -> Self {
        match mode {
            FtpConnectMode::Passive => Self::Passive,
            FtpConnectMode::Active => Self::Active,
            FtpConnectMode::ExtendedPassive => Self::ExtendedPassive,
            FtpConnectMode::ExtendedActive => Self::ExtendedActive,
        }
    }
}

// ─── Responses ───────────────────────────────────────────────────────

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// All lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text of the last line without the reply code.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .map(|l| l.get(4..).unwrap_or("").trim())
            .unwrap_or("")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// Extensions announced in the FEAT reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFeatures {
    pub mdtm: bool,
    pub size: bool,
    pub mlsd: bool,
    pub utf8: bool,
    pub epsv: bool,
    pub raw: Vec<String>,
}

impl ServerFeatures {
    pub fn from_lines(lines: &[String]) -> Self {
        let raw: Vec<String> = lines
            .iter()
            .skip(1)
            .filter(|l| !l.starts_with("211"))
            .map(|l| l.trim().to_uppercase())
            .collect();
        let has = |feat: &str| raw.iter().any(|l| l.starts_with(feat));
        Self {
            mdtm: has("MDTM"),
            size: has("SIZE"),
            mlsd: has("MLSD") || has("MLST"),
            utf8: has("UTF8"),
            epsv: has("EPSV"),
            raw,
        }
    }
}

// ─── Listing entries ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    SymbolicLink,
    Unknown,
}

/// One line of a directory listing, as understood by a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Bytes, `-1` when the listing has no size.
    pub size: i64,
    /// Epoch milliseconds (UTC).
    pub modified: Option<i64>,
    pub permission: Option<Permission>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
}

impl FtpEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: -1,
            modified: None,
            permission: None,
            owner: None,
            group: None,
            link_target: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_classes() {
        let resp = FtpResponse {
            code: 257,
            lines: vec!["257 \"/\" is current directory".into()],
        };
        assert!(resp.is_success());
        assert!(!resp.is_preliminary());
        assert_eq!(resp.message(), "\"/\" is current directory");
    }

    #[test]
    fn features_from_feat_reply() {
        let lines: Vec<String> = ["211-Features:", " MDTM", " SIZE", " UTF8", "211 End"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let features = ServerFeatures::from_lines(&lines);
        assert!(features.mdtm && features.size && features.utf8);
        assert!(!features.mlsd);
        assert_eq!(features.raw.len(), 3);
    }

    #[test]
    fn connect_mode_mapping() {
        assert_eq!(
            DataChannelMode::from(FtpConnectMode::ExtendedPassive),
            DataChannelMode::ExtendedPassive
        );
        assert_eq!(DataChannelMode::default(), DataChannelMode::Passive);
    }
}
