//! Shared types used across all pipeline stages.
//!
//! The [`RenameMap`] is the one value every stage after hashing depends on.
//! It is only ever built through a [`RenameMapBuilder`] owned by the hasher;
//! once frozen it has no mutators, so no later stage can change it.

use serde::Serialize;
use std::collections::BTreeMap;

/// Classification of a hashable asset, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Style,
    Script,
    Image,
    Font,
}

const STYLE_EXTENSIONS: &[&str] = &["css"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs"];
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "ico",
];
const FONT_EXTENSIONS: &[&str] = &["woff2", "woff", "ttf", "otf", "eot"];

impl AssetKind {
    /// Classify by extension (case-insensitive). `None` for files that are
    /// copied through untouched, such as `project.json`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if STYLE_EXTENSIONS.contains(&ext) {
            Some(Self::Style)
        } else if SCRIPT_EXTENSIONS.contains(&ext) {
            Some(Self::Script)
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if FONT_EXTENSIONS.contains(&ext) {
            Some(Self::Font)
        } else {
            None
        }
    }
}

/// One hashable file in the staging tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AssetRecord {
    /// Path relative to the build root, `/`-separated.
    pub rel_path: String,
    pub kind: AssetKind,
}

impl AssetRecord {
    /// Build a record from a relative path, or `None` if the extension is not
    /// a recognized asset type.
    pub fn from_rel_path(rel_path: &str) -> Option<Self> {
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let (_, ext) = file_name.rsplit_once('.')?;
        let kind = AssetKind::from_extension(ext)?;
        Some(Self {
            rel_path: rel_path.to_string(),
            kind,
        })
    }
}

/// Original relative path → hashed relative path, ordered by original path.
///
/// Keys are exactly the assets hashed in this build. Iteration is always in
/// key order, so anything derived from the map ("the first stylesheet") is
/// the same on every run with the same input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RenameMap {
    entries: BTreeMap<String, String>,
}

impl RenameMap {
    /// Hashed path for an original path.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn contains(&self, original: &str) -> bool {
        self.entries.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by original path.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First hashed path (by original key) under `dir` with extension `ext`.
    pub fn first_under(&self, dir: &str, ext: &str) -> Option<&str> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let suffix = format!(".{ext}");
        self.iter()
            .find(|(original, _)| original.starts_with(&prefix) && original.ends_with(&suffix))
            .map(|(_, hashed)| hashed)
    }
}

/// The only way to populate a [`RenameMap`]. Owned by the hasher for the
/// duration of the hashing phase and consumed by [`freeze`](Self::freeze).
#[derive(Debug, Default)]
pub struct RenameMapBuilder {
    map: RenameMap,
}

impl RenameMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. Returns `false` (and changes nothing) if the
    /// original path was already recorded: entries are never overwritten.
    pub fn insert(&mut self, original: String, hashed: String) -> bool {
        if self.map.entries.contains_key(&original) {
            return false;
        }
        self.map.entries.insert(original, hashed);
        true
    }

    /// Read-only view of everything recorded so far.
    pub fn view(&self) -> &RenameMap {
        &self.map
    }

    pub fn freeze(self) -> RenameMap {
        self.map
    }
}
