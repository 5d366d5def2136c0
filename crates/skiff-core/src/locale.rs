//! Message lookup and `{0}`-style formatting.

use std::collections::HashMap;

pub const DEFAULT_TABLE: &str = "Localizable";
pub const STATUS_TABLE: &str = "Status";
pub const INFO_TABLE: &str = "Info";

/// Translation table keyed by `(table, key)`. Missing entries render as the
/// key itself, so an empty table yields the English source strings.
#[derive(Debug, Clone, Default)]
pub struct LocaleTable {
    entries: HashMap<(String, String), String>,
}

impl LocaleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(
        mut self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert(table, key, value);
        self
    }

    pub fn insert(
        &mut self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.entries
            .insert((table.into(), key.into()), value.into());
    }

    pub fn localized(&self, key: &str, table: &str) -> String {
        self.entries
            .get(&(table.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Localize `key` and substitute the positional arguments.
    pub fn format(&self, key: &str, table: &str, args: &[&str]) -> String {
        format_message(&self.localized(key, table), args)
    }
}

/// Replace `{0}`, `{1}`, ... with the given arguments. Placeholders without
/// a matching argument are left untouched.
pub fn format_message(pattern: &str, args: &[&str]) -> String {
    args.iter()
        .enumerate()
        .fold(pattern.to_string(), |acc, (i, arg)| {
            acc.replace(&format!("{{{}}}", i), arg)
        })
}
