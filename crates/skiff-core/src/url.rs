use serde::{Deserialize, Serialize};
use std::fmt;
use ::url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrlKind {
    Http,
    Cname,
    Signed,
    Torrent,
    Provider,
    Authenticated,
}

/// A URL with a human readable label, as shown in the share menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptiveUrl {
    url: Url,
    kind: UrlKind,
    label: String,
}

impl DescriptiveUrl {
    pub fn new(url: Url, kind: UrlKind, label: impl Into<String>) -> Self {
        Self {
            url,
            kind,
            label: label.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> UrlKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for DescriptiveUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.url)
    }
}
