//! LIST / STAT / MLSD listing parsers.
//!
//! Supported formats:
//! 1. **Unix** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 2. **Lax Unix**: missing link count or group, ISO dates, odd mode strings
//! 3. **Windows NT / IIS**: `01-01-26  12:00AM       1234 file.txt`
//! 4. **Netware**: `d [RWCEAFMS] owner 512 Jan 04 02:11 tmp`
//! 5. **Rumpus**: `-rw-r--r--        0        1468     1468 Nov 29 21:10 file.txt`
//! 6. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//!
//! Dates without a year are placed in the most recent year that does not
//! put them in the future. Wall-clock dates are read in the server timezone.

use crate::ftp::types::{EntryKind, FtpEntry};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use skiff_core::Permission;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

const DAY_MS: i64 = 86_400_000;

static NEXT_PARSER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a parser instance, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParserId(u64);

impl ParserId {
    fn next() -> Self {
        Self(NEXT_PARSER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Listing dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    Unix,
    LaxUnix,
    WindowsNt,
    Netware,
    Rumpus,
    Mlsd,
}

impl ParserKind {
    /// Whether listings in this dialect carry permission bits.
    pub fn reports_permissions(&self) -> bool {
        matches!(
            self,
            ParserKind::Unix | ParserKind::LaxUnix | ParserKind::Netware | ParserKind::Rumpus
        )
    }
}

/// Tunables for configurable parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Overrides the timezone the parser was built for.
    pub server_timezone: Option<Tz>,
    /// Accept recent-format dates up to one day in the future before moving
    /// them to the previous year (clock skew between client and server).
    pub lenient_future_dates: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            server_timezone: None,
            lenient_future_dates: true,
        }
    }
}

// ─── Single-dialect parser ───────────────────────────────────────────

#[derive(Debug)]
pub struct EntryParser {
    id: ParserId,
    kind: ParserKind,
    timezone: Tz,
    config: ParserConfig,
    pattern: Regex,
}

impl EntryParser {
    pub fn new(kind: ParserKind, timezone: Tz) -> Result<Self, regex::Error> {
        let pattern = Regex::new(match kind {
            ParserKind::Unix => UNIX,
            ParserKind::LaxUnix => LAX_UNIX,
            ParserKind::WindowsNt => WINDOWS_NT,
            ParserKind::Netware => NETWARE,
            ParserKind::Rumpus => RUMPUS,
            ParserKind::Mlsd => MLSD,
        })?;
        Ok(Self {
            id: ParserId::next(),
            kind,
            timezone,
            config: ParserConfig::default(),
            pattern,
        })
    }

    pub fn id(&self) -> ParserId {
        self.id
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    pub fn timezone(&self) -> Tz {
        self.config.server_timezone.unwrap_or(self.timezone)
    }

    /// MLSD times are always UTC, every other dialect takes a configuration.
    pub fn is_configurable(&self) -> bool {
        self.kind != ParserKind::Mlsd
    }

    pub fn configure(&mut self, config: Option<ParserConfig>) {
        self.config = config.unwrap_or_default();
    }

    pub fn parse_at(&self, line: &str, now_ms: i64) -> Option<FtpEntry> {
        let caps = self.pattern.captures(line)?;
        let get = |name: &str| caps.name(name).map(|m| m.as_str());
        match self.kind {
            ParserKind::Unix | ParserKind::LaxUnix => {
                let kind = unix_kind(get("type")?);
                let mut entry = self.named_entry(get("name")?, kind);
                entry.permission = get("perms").and_then(Permission::from_symbolic);
                entry.owner = get("owner").map(str::to_string);
                entry.group = get("group").map(str::to_string);
                entry.size = get("size").and_then(|s| s.parse().ok()).unwrap_or(-1);
                entry.modified = self.parse_date(get("date")?, now_ms);
                Some(entry)
            }
            ParserKind::WindowsNt => {
                let size = get("size")?;
                let kind = if size.eq_ignore_ascii_case("<DIR>") {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                let mut entry = FtpEntry::new(get("name")?.trim_end(), kind);
                entry.size = size.parse().unwrap_or(-1);
                entry.modified = self.parse_windows_date(get("date")?, get("time")?);
                Some(entry)
            }
            ParserKind::Netware => {
                let kind = if get("type")? == "d" {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                let mut entry = FtpEntry::new(get("name")?, kind);
                entry.permission = Some(netware_permission(get("rights")?, kind));
                entry.owner = get("owner").map(str::to_string);
                entry.size = get("size").and_then(|s| s.parse().ok()).unwrap_or(-1);
                entry.modified = self.parse_date(get("date")?, now_ms);
                Some(entry)
            }
            ParserKind::Rumpus => {
                let kind = unix_kind(get("type")?);
                let mut entry = FtpEntry::new(get("name")?, kind);
                entry.permission = get("perms").and_then(Permission::from_symbolic);
                entry.size = get("size").and_then(|s| s.parse().ok()).unwrap_or(-1);
                entry.modified = self.parse_date(get("date")?, now_ms);
                Some(entry)
            }
            ParserKind::Mlsd => parse_mlsd(get("facts")?, get("name")?),
        }
    }

    fn named_entry(&self, raw: &str, kind: EntryKind) -> FtpEntry {
        if kind == EntryKind::SymbolicLink {
            if let Some((name, target)) = raw.split_once(" -> ") {
                let mut entry = FtpEntry::new(name, kind);
                entry.link_target = Some(target.to_string());
                return entry;
            }
        }
        FtpEntry::new(raw, kind)
    }

    /// `Jan  1 12:00`, `Jan  1  2025` or `2025-01-01 12:00`.
    fn parse_date(&self, text: &str, now_ms: i64) -> Option<i64> {
        let tz = self.timezone();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M") {
            return local_to_utc(tz, &naive);
        }
        if let Ok(date) = NaiveDate::parse_from_str(&text, "%b %d %Y") {
            return local_to_utc(tz, &date.and_hms_opt(0, 0, 0)?);
        }
        // Recent format: the year is implied.
        let now = tz.timestamp_millis_opt(now_ms).single()?;
        let year = now.year();
        let naive =
            NaiveDateTime::parse_from_str(&format!("{} {}", year, text), "%Y %b %d %H:%M").ok()?;
        let parsed = local_to_utc(tz, &naive)?;
        let horizon = if self.config.lenient_future_dates {
            now_ms + DAY_MS
        } else {
            now_ms
        };
        if parsed > horizon {
            let last_year =
                NaiveDateTime::parse_from_str(&format!("{} {}", year - 1, text), "%Y %b %d %H:%M")
                    .ok()?;
            return local_to_utc(tz, &last_year);
        }
        Some(parsed)
    }

    fn parse_windows_date(&self, date: &str, time: &str) -> Option<i64> {
        let tz = self.timezone();
        let text = format!("{} {}", date, time.to_uppercase());
        [
            "%m-%d-%y %I:%M%p",
            "%m-%d-%Y %I:%M%p",
            "%m-%d-%y %H:%M",
            "%m-%d-%Y %H:%M",
        ]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&text, fmt).ok())
        .and_then(|naive| local_to_utc(tz, &naive))
    }
}

fn local_to_utc(tz: Tz, naive: &NaiveDateTime) -> Option<i64> {
    tz.from_local_datetime(naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

fn unix_kind(marker: &str) -> EntryKind {
    match marker {
        "d" => EntryKind::Directory,
        "l" => EntryKind::SymbolicLink,
        "-" | "f" => EntryKind::File,
        _ => EntryKind::Unknown,
    }
}

/// Netware trustee rights mapped onto owner bits.
fn netware_permission(rights: &str, kind: EntryKind) -> Permission {
    let mut mode = 0;
    if rights.contains('R') {
        mode |= 0o400;
    }
    if rights.contains('W') {
        mode |= 0o200;
    }
    if kind == EntryKind::Directory || rights.contains('F') {
        mode |= 0o100;
    }
    Permission::from_mode(mode)
}

fn parse_mlsd(facts: &str, name: &str) -> Option<FtpEntry> {
    let mut kind = EntryKind::Unknown;
    let mut size = -1;
    let mut modified = None;
    let mut permission = None;
    let mut owner = None;
    let mut group = None;
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let (key, value) = fact.split_once('=')?;
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Directory,
                    "os.unix=symlink" | "os.unix=slink" => EntryKind::SymbolicLink,
                    // Current and parent directory entries.
                    "cdir" | "pdir" => return None,
                    _ => EntryKind::Unknown,
                }
            }
            "size" => size = value.parse().unwrap_or(-1),
            "modify" => {
                modified = value
                    .get(..14)
                    .and_then(|v| NaiveDateTime::parse_from_str(v, "%Y%m%d%H%M%S").ok())
                    .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis())
            }
            "unix.mode" => {
                permission = u32::from_str_radix(value, 8).ok().map(Permission::from_mode)
            }
            "unix.owner" => owner = Some(value.to_string()),
            "unix.group" => group = Some(value.to_string()),
            _ => {}
        }
    }
    let mut entry = FtpEntry::new(name, kind);
    entry.size = size;
    entry.modified = modified;
    entry.permission = permission;
    entry.owner = owner;
    entry.group = group;
    Some(entry)
}

const UNIX: &str = r"(?x)
    ^(?P<type>[bcdelfmpSs-])
    (?P<perms>[rwxsStT-]{9})[+.@]?\s+
    \d+\s+
    (?P<owner>\S+)\s+
    (?P<group>\S+)\s+
    (?P<size>\d+)\s+
    (?P<date>[A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s
    (?P<name>.+)$";

const LAX_UNIX: &str = r"(?x)
    ^(?P<type>[bcdelfmpSs-])
    (?P<perms>\S{9})\S*\s+
    (?:\d+\s+)?
    (?P<owner>\S+)\s+
    (?:(?P<group>\S+)\s+)?
    (?P<size>\d+)\s+
    (?P<date>[A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4})|\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2})\s+
    (?P<name>.+)$";

const WINDOWS_NT: &str = r"(?x)
    ^(?P<date>\d{2}-\d{2}-\d{2,4})\s+
    (?P<time>\d{1,2}:\d{2}(?:[AaPp][Mm])?)\s+
    (?P<size><DIR>|\d+)\s+
    (?P<name>.+)$";

const NETWARE: &str = r"(?x)
    ^(?P<type>[d-])\s+
    \[(?P<rights>[RWCEAFMS-]+)\]\s+
    (?P<owner>\S+)\s+
    (?P<size>\d+)\s+
    (?P<date>[A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s+
    (?P<name>.+)$";

const RUMPUS: &str = r"(?x)
    ^(?P<type>[d-])
    (?P<perms>[rwx-]{9})\s+
    (?:folder|\d+\s+\d+)\s+
    (?P<size>\d+)\s+
    (?P<date>[A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s+
    (?P<name>.+)$";

const MLSD: &str = r"^(?P<facts>(?:[^=;\s]+=[^;]*;)+) (?P<name>.+)$";

// ─── Composite ───────────────────────────────────────────────────────

/// Tries each delegate in order and sticks with the first one that
/// understands a line.
#[derive(Debug)]
pub struct CompositeParser {
    id: ParserId,
    delegates: Vec<EntryParser>,
    cached: Mutex<Option<usize>>,
}

impl CompositeParser {
    pub fn new(delegates: Vec<EntryParser>) -> Self {
        Self {
            id: ParserId::next(),
            delegates,
            cached: Mutex::new(None),
        }
    }

    pub fn delegates(&self) -> &[EntryParser] {
        &self.delegates
    }

    /// The delegate that parsed the first recognised line, if any.
    pub fn cached_delegate(&self) -> Option<&EntryParser> {
        let index = (*self.cached.lock().unwrap_or_else(PoisonError::into_inner))?;
        self.delegates.get(index)
    }

    fn parse_at(&self, line: &str, now_ms: i64) -> Option<FtpEntry> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = *cached {
            return self.delegates.get(index)?.parse_at(line, now_ms);
        }
        for (index, delegate) in self.delegates.iter().enumerate() {
            if let Some(entry) = delegate.parse_at(line, now_ms) {
                log::debug!("Listing format detected as {:?}", delegate.kind());
                *cached = Some(index);
                return Some(entry);
            }
        }
        None
    }
}

// ─── Sum type ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum FtpParser {
    Single(EntryParser),
    Composite(CompositeParser),
}

impl FtpParser {
    pub fn id(&self) -> ParserId {
        match self {
            FtpParser::Single(p) => p.id(),
            FtpParser::Composite(c) => c.id,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            FtpParser::Single(p) => p.is_configurable(),
            FtpParser::Composite(c) => c.delegates.iter().any(EntryParser::is_configurable),
        }
    }

    pub fn configure(&mut self, config: Option<ParserConfig>) {
        match self {
            FtpParser::Single(p) => p.configure(config),
            FtpParser::Composite(c) => {
                for delegate in c.delegates.iter_mut().filter(|d| d.is_configurable()) {
                    delegate.configure(config);
                }
            }
        }
    }

    pub fn parse(&self, line: &str) -> Option<FtpEntry> {
        self.parse_at(line, Utc::now().timestamp_millis())
    }

    /// Parse relative to `now_ms`, which decides the year of recent dates.
    pub fn parse_at(&self, line: &str, now_ms: i64) -> Option<FtpEntry> {
        let entry = match self {
            FtpParser::Single(p) => p.parse_at(line, now_ms),
            FtpParser::Composite(c) => c.parse_at(line, now_ms),
        }?;
        if entry.name == "." || entry.name == ".." {
            return None;
        }
        Some(entry)
    }

    /// Parse a full listing body, skipping `total` lines and anything no
    /// dialect understands.
    pub fn parse_listing(&self, lines: &[String], now_ms: i64) -> Vec<FtpEntry> {
        lines
            .iter()
            .map(|l| l.trim_end())
            .filter(|l| !l.is_empty() && !l.starts_with("total "))
            .filter_map(|l| {
                let parsed = self.parse_at(l, now_ms);
                if parsed.is_none() {
                    log::trace!("Unparsed listing line: {}", l);
                }
                parsed
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2023-11-14T22:13:20Z
    const NOW: i64 = 1_700_000_000_000;

    fn single(kind: ParserKind, tz: Tz) -> FtpParser {
        FtpParser::Single(EntryParser::new(kind, tz).unwrap())
    }

    fn utc_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().timestamp_millis()
    }

    #[test]
    fn unix_file_with_recent_date() {
        let parser = single(ParserKind::Unix, Tz::UTC);
        let entry = parser
            .parse_at("-rw-r--r--   1 alice staff  1234 Nov 10 12:00 report.txt", NOW)
            .unwrap();
        assert_eq!(entry.name, "report.txt");
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, 1234);
        assert_eq!(entry.owner.as_deref(), Some("alice"));
        assert_eq!(entry.permission.unwrap().mode(), 0o644);
        assert_eq!(entry.modified, Some(utc_ms(2023, 11, 10, 12, 0)));
    }

    #[test]
    fn future_recent_date_moves_to_last_year() {
        let parser = single(ParserKind::Unix, Tz::UTC);
        let entry = parser
            .parse_at("-rw-r--r--   1 a b  1 Dec 24 08:00 gift", NOW)
            .unwrap();
        assert_eq!(entry.modified, Some(utc_ms(2022, 12, 24, 8, 0)));
    }

    #[test]
    fn dates_read_in_server_timezone() {
        let parser = single(ParserKind::Unix, Tz::Europe__Berlin);
        let entry = parser
            .parse_at("-rw-r--r--   1 a b  1 Jan  5  2021 old", NOW)
            .unwrap();
        assert_eq!(entry.modified, Some(utc_ms(2021, 1, 4, 23, 0)));
    }

    #[test]
    fn unix_symlink_and_directory() {
        let parser = single(ParserKind::Unix, Tz::UTC);
        let link = parser
            .parse_at("lrwxrwxrwx   1 root root    7 Nov  1 10:00 bin -> usr/bin", NOW)
            .unwrap();
        assert_eq!(link.name, "bin");
        assert_eq!(link.link_target.as_deref(), Some("usr/bin"));
        let dir = parser
            .parse_at("drwxr-xr-x   2 root root 4096 Nov  1 10:00 etc", NOW)
            .unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert!(parser
            .parse_at("drwxr-xr-x   2 root root 4096 Nov  1 10:00 .", NOW)
            .is_none());
    }

    #[test]
    fn lax_unix_without_group() {
        let parser = single(ParserKind::LaxUnix, Tz::UTC);
        let entry = parser
            .parse_at("-rw-r--r--   1 ftp  532 2023-11-01 09:30 notes.md", NOW)
            .unwrap();
        assert_eq!(entry.name, "notes.md");
        assert_eq!(entry.size, 532);
        assert_eq!(entry.modified, Some(utc_ms(2023, 11, 1, 9, 30)));
    }

    #[test]
    fn windows_listing() {
        let parser = single(ParserKind::WindowsNt, Tz::UTC);
        let dir = parser.parse_at("11-02-23  03:15PM       <DIR>          Reports", NOW).unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.modified, Some(utc_ms(2023, 11, 2, 15, 15)));
        let file = parser.parse_at("11-02-23  09:05AM            42 a b.txt", NOW).unwrap();
        assert_eq!(file.name, "a b.txt");
        assert_eq!(file.size, 42);
    }

    #[test]
    fn netware_and_rumpus() {
        let netware = single(ParserKind::Netware, Tz::UTC);
        let entry = netware
            .parse_at("d [RWCEAFMS] tim  512 Nov 04 02:11 tmp", NOW)
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Directory);
        assert_eq!(entry.permission.unwrap().mode(), 0o700);

        let rumpus = single(ParserKind::Rumpus, Tz::UTC);
        let file = rumpus
            .parse_at("-rw-r--r--        0        1468     1468 Nov 10 21:10 file.txt", NOW)
            .unwrap();
        assert_eq!(file.size, 1468);
        let folder = rumpus
            .parse_at("drwxr-xr-x               folder        0 Nov 10 10:03 Stuff", NOW)
            .unwrap();
        assert_eq!(folder.kind, EntryKind::Directory);
        assert_eq!(folder.name, "Stuff");
    }

    #[test]
    fn mlsd_facts() {
        let parser = single(ParserKind::Mlsd, Tz::Europe__Berlin);
        let entry = parser
            .parse_at("type=file;size=10;modify=20231114221320;unix.mode=0640; data.bin", NOW)
            .unwrap();
        assert_eq!(entry.size, 10);
        assert_eq!(entry.modified, Some(NOW));
        assert_eq!(entry.permission.unwrap().mode(), 0o640);
        assert!(parser.parse_at("type=cdir;modify=20231114221320; /pub", NOW).is_none());
    }

    #[test]
    fn composite_sticks_with_first_match() {
        let composite = CompositeParser::new(vec![
            EntryParser::new(ParserKind::WindowsNt, Tz::UTC).unwrap(),
            EntryParser::new(ParserKind::Unix, Tz::UTC).unwrap(),
        ]);
        let parser = FtpParser::Composite(composite);
        assert!(parser
            .parse_at("-rw-r--r-- 1 a b 1 Nov 10 12:00 x", NOW)
            .is_some());
        if let FtpParser::Composite(ref c) = parser {
            assert_eq!(c.cached_delegate().unwrap().kind(), ParserKind::Unix);
        }
        // Windows lines are no longer tried.
        assert!(parser.parse_at("11-02-23  03:15PM  <DIR> Reports", NOW).is_none());
    }

    #[test]
    fn configuration_overrides_timezone() {
        let mut parser = single(ParserKind::Unix, Tz::UTC);
        parser.configure(Some(ParserConfig {
            server_timezone: Some(Tz::Europe__Berlin),
            lenient_future_dates: true,
        }));
        let entry = parser
            .parse_at("-rw-r--r-- 1 a b 1 Nov 10 12:00 x", NOW)
            .unwrap();
        assert_eq!(entry.modified, Some(utc_ms(2023, 11, 10, 11, 0)));
    }

    #[test]
    fn listing_skips_total_and_garbage() {
        let parser = single(ParserKind::Unix, Tz::UTC);
        let lines: Vec<String> = [
            "total 8",
            "-rw-r--r-- 1 a b 1 Nov 10 12:00 x",
            "garbage",
            "drwxr-xr-x 2 a b 4096 Nov 10 12:00 dir",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let entries = parser.parse_listing(&lines, NOW);
        assert_eq!(entries.len(), 2);
        assert_ne!(parser.id(), single(ParserKind::Unix, Tz::UTC).id());
    }
}
