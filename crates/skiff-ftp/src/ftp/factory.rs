//! Listing parser selection from the `SYST` reply.

use crate::ftp::parser::{CompositeParser, EntryParser, FtpParser, ParserId, ParserKind};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("listing format of '{system}' servers is not supported")]
    Unsupported { system: String },
    #[error("invalid listing pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Builds parsers keyed by `(system, timezone)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpParserFactory;

impl FtpParserFactory {
    pub fn new() -> Self {
        Self
    }

    /// Parser for a server identifying itself as `system`. Unknown or
    /// missing identifications get a composite that detects the format
    /// from the first line it understands.
    pub fn create(&self, system: Option<&str>, timezone: Tz) -> Result<FtpParser, ParserError> {
        let system = system.map(str::trim).unwrap_or_default();
        let upper = system.to_uppercase();
        let os = upper.split_whitespace().next().unwrap_or_default();
        let parser = match os {
            "" => Self::default_parser(timezone)?,
            _ if os.starts_with("VMS") || os.starts_with("OS/400") || os.starts_with("MVS") => {
                return Err(ParserError::Unsupported {
                    system: system.to_string(),
                })
            }
            "UNIX" | "L8" => Self::composite(&[ParserKind::Unix, ParserKind::LaxUnix], timezone)?,
            _ if os.starts_with("WINDOWS") => {
                Self::composite(&[ParserKind::WindowsNt, ParserKind::Unix], timezone)?
            }
            _ if os.starts_with("NETWARE") => {
                FtpParser::Single(EntryParser::new(ParserKind::Netware, timezone)?)
            }
            _ if upper.contains("RUMPUS") || os.starts_with("MACOS") => {
                Self::composite(&[ParserKind::Rumpus, ParserKind::Unix], timezone)?
            }
            _ => {
                log::debug!("Unknown system '{}', using default parser", system);
                Self::default_parser(timezone)?
            }
        };
        Ok(parser)
    }

    fn composite(kinds: &[ParserKind], timezone: Tz) -> Result<FtpParser, ParserError> {
        let delegates = kinds
            .iter()
            .map(|k| EntryParser::new(*k, timezone))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FtpParser::Composite(CompositeParser::new(delegates)))
    }

    fn default_parser(timezone: Tz) -> Result<FtpParser, ParserError> {
        Self::composite(
            &[
                ParserKind::Unix,
                ParserKind::WindowsNt,
                ParserKind::Netware,
                ParserKind::Rumpus,
                ParserKind::LaxUnix,
            ],
            timezone,
        )
    }
}

/// Remembers per parser instance whether its listings carry permissions.
#[derive(Debug, Default)]
pub struct PermissionProbe {
    cache: Mutex<HashMap<ParserId, bool>>,
    classifications: AtomicUsize,
}

impl PermissionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_permission_supported(&self, parser: &FtpParser) -> bool {
        let delegate = match parser {
            FtpParser::Single(p) => p,
            FtpParser::Composite(c) => match c.cached_delegate() {
                Some(d) => d,
                None => {
                    log::warn!("Composite parser has not settled on a listing format yet");
                    return false;
                }
            },
        };
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        *cache.entry(delegate.id()).or_insert_with(|| {
            self.classifications.fetch_add(1, Ordering::Relaxed);
            delegate.kind().reports_permissions()
        })
    }

    /// Forget every classification; parser ids of a dropped parser never
    /// come back.
    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Parsers currently remembered.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How often a parser had to be classified.
    pub fn classifications(&self) -> usize {
        self.classifications.load(Ordering::Relaxed)
    }
}
