use crate::path::Path;
use std::collections::{BTreeMap, HashMap};

/// A pending metadata edit over a selection of paths.
///
/// `original` holds the metadata each selected path had when the edit
/// started. In `metadata`, a `None` value means "leave this key as it is on
/// every path"; a key absent from `metadata` but present in a path's original
/// metadata is removed from that path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataOverwrite {
    pub original: HashMap<Path, BTreeMap<String, String>>,
    pub metadata: BTreeMap<String, Option<String>>,
}

impl MetadataOverwrite {
    pub fn new(
        original: HashMap<Path, BTreeMap<String, String>>,
        metadata: BTreeMap<String, Option<String>>,
    ) -> Self {
        Self { original, metadata }
    }

    /// Overwrite for a single path, taking its current metadata as the
    /// original snapshot.
    pub fn for_path(path: Path, metadata: BTreeMap<String, Option<String>>) -> Self {
        let current = path.attributes().metadata.clone();
        let mut original = HashMap::new();
        original.insert(path, current);
        Self { original, metadata }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.original.keys()
    }
}
