//! Remote path model.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

pub const DELIMITER: char = '/';

bitflags! {
    /// Kind of a remote entry. A path may carry several flags at once, e.g. a
    /// mount point is `VOLUME | DIRECTORY`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PathType: u8 {
        const FILE = 1;
        const DIRECTORY = 1 << 1;
        const VOLUME = 1 << 2;
        const PLACEHOLDER = 1 << 3;
        const SYMBOLIC_LINK = 1 << 4;
    }
}

/// Unix permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    mode: u32,
}

impl Permission {
    pub fn from_mode(mode: u32) -> Self {
        Self { mode: mode & 0o7777 }
    }

    /// Parse the nine-character `rwxr-xr-x` form used by `ls -l`. Setuid,
    /// setgid and sticky markers (`s`, `S`, `t`, `T`) are understood.
    pub fn from_symbolic(symbolic: &str) -> Option<Self> {
        let chars: Vec<char> = symbolic.chars().collect();
        if chars.len() != 9 {
            return None;
        }
        let mut mode = 0u32;
        for (triplet, special) in [(0usize, 0o4000u32), (3, 0o2000), (6, 0o1000)] {
            let shift = 6 - triplet as u32;
            match chars[triplet] {
                'r' => mode |= 0o4 << shift,
                '-' => {}
                _ => return None,
            }
            match chars[triplet + 1] {
                'w' => mode |= 0o2 << shift,
                '-' => {}
                _ => return None,
            }
            match chars[triplet + 2] {
                'x' => mode |= 0o1 << shift,
                's' | 't' => mode |= (0o1 << shift) | special,
                'S' | 'T' => mode |= special,
                '-' => {}
                _ => return None,
            }
        }
        Some(Self { mode })
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specials: [(u32, char); 3] = [(0o4000, 's'), (0o2000, 's'), (0o1000, 't')];
        for (i, &(special, marker)) in specials.iter().enumerate() {
            let shift = 6 - 3 * i as u32;
            let bits = (self.mode >> shift) & 0o7;
            let read = if bits & 0o4 != 0 { 'r' } else { '-' };
            let write = if bits & 0o2 != 0 { 'w' } else { '-' };
            let exec = match (bits & 0o1 != 0, self.mode & special != 0) {
                (true, true) => marker,
                (false, true) => marker.to_ascii_uppercase(),
                (true, false) => 'x',
                (false, false) => '-',
            };
            write!(f, "{}{}{}", read, write, exec)?;
        }
        Ok(())
    }
}

/// Attributes reported by the server for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAttributes {
    /// Size in bytes, `-1` when unknown.
    pub size: i64,
    /// Modification time in epoch milliseconds, `-1` when unknown.
    pub modification_date: i64,
    pub permission: Option<Permission>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub etag: Option<String>,
    pub link_target: Option<String>,
}

impl Default for PathAttributes {
    fn default() -> Self {
        Self {
            size: -1,
            modification_date: -1,
            permission: None,
            owner: None,
            group: None,
            metadata: BTreeMap::new(),
            etag: None,
            link_target: None,
        }
    }
}

/// A remote path. Equality and hashing consider the absolute path and the
/// type flags only, never the attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    absolute: String,
    kind: PathType,
    attributes: PathAttributes,
}

/// Listing result.
pub type AttributedList = Vec<Path>;

impl Path {
    pub fn new(absolute: impl AsRef<str>, kind: PathType) -> Self {
        Self {
            absolute: normalize(absolute.as_ref()),
            kind,
            attributes: PathAttributes::default(),
        }
    }

    pub fn root() -> Self {
        Self::new("/", PathType::DIRECTORY | PathType::VOLUME)
    }

    pub fn child(parent: &Path, name: &str, kind: PathType) -> Self {
        if parent.is_root() {
            Self::new(format!("/{}", name), kind)
        } else {
            Self::new(format!("{}/{}", parent.absolute, name), kind)
        }
    }

    pub fn with_attributes(mut self, attributes: PathAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn absolute(&self) -> &str {
        &self.absolute
    }

    pub fn kind(&self) -> PathType {
        self.kind
    }

    pub fn set_kind(&mut self, kind: PathType) {
        self.kind = kind;
    }

    pub fn attributes(&self) -> &PathAttributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut PathAttributes {
        &mut self.attributes
    }

    /// Last segment, `/` for the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return "/";
        }
        self.absolute
            .rsplit(DELIMITER)
            .next()
            .unwrap_or(&self.absolute)
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let parent = match self.absolute.rfind(DELIMITER) {
            Some(0) | None => "/",
            Some(idx) => &self.absolute[..idx],
        };
        Some(Path::new(parent, PathType::DIRECTORY))
    }

    pub fn is_root(&self) -> bool {
        self.absolute == "/"
    }

    pub fn is_file(&self) -> bool {
        self.kind.contains(PathType::FILE)
    }

    pub fn is_directory(&self) -> bool {
        self.kind.contains(PathType::DIRECTORY)
    }

    pub fn is_volume(&self) -> bool {
        self.kind.contains(PathType::VOLUME)
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind.contains(PathType::PLACEHOLDER)
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.kind.contains(PathType::SYMBOLIC_LINK)
    }

    /// Strict descendant check on whole segments, so `/ab` is not a child of `/a`.
    pub fn is_child_of(&self, other: &Path) -> bool {
        if self.absolute == other.absolute {
            return false;
        }
        if other.is_root() {
            return true;
        }
        self.absolute
            .strip_prefix(other.absolute.as_str())
            .map(|rest| rest.starts_with(DELIMITER))
            .unwrap_or(false)
    }

    pub fn is_self_or_child_of(&self, other: &Path) -> bool {
        self.absolute == other.absolute || self.is_child_of(other)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.absolute == other.absolute && self.kind == other.kind
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.absolute.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute)
    }
}

/// Collapse duplicate and trailing delimiters and resolve `.`/`..`.
fn normalize(input: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in input.split(DELIMITER) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Expands a leading `~` to the local home directory and back.
#[derive(Debug, Clone)]
pub struct TildeExpander {
    home: String,
}

const HOME: &str = "~";

impl TildeExpander {
    pub fn new() -> Self {
        let home = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        Self::with_home(home)
    }

    pub fn with_home(home: impl Into<String>) -> Self {
        let home = home.into();
        let home = home.trim_end_matches(DELIMITER).to_string();
        Self { home }
    }

    pub fn expand(&self, path: &str) -> String {
        if path == HOME {
            return self.home.clone();
        }
        match path.strip_prefix("~/") {
            Some(rest) => format!("{}/{}", self.home, rest),
            None => path.to_string(),
        }
    }

    pub fn abbreviate(&self, path: &str) -> String {
        if self.home.is_empty() {
            return path.to_string();
        }
        if path == self.home {
            return HOME.to_string();
        }
        match path.strip_prefix(&format!("{}/", self.home)) {
            Some(rest) => format!("~/{}", rest),
            None => path.to_string(),
        }
    }
}

impl Default for TildeExpander {
    fn default() -> Self {
        Self::new()
    }
}
