//! Centralized filename parsing for the `name.<fingerprint>.ext` convention.
//!
//! Every hashed asset follows the same naming pattern: the original stem, a
//! dot, a lowercase hex fingerprint, and the original extension. This module
//! is the single place that splits and joins names in that shape, so the
//! hasher, the head reconstructor and the version-script lookup all agree on
//! what counts as "already hashed".
//!
//! ## Examples
//!
//! - `style.css` → stem `style`, no fingerprint, extension `css`
//! - `style.3f9a1c2b.css` → stem `style`, fingerprint `3f9a1c2b`, extension `css`
//! - `jquery.min.js` → stem `jquery.min`, no fingerprint (`min` is not hex)
//! - `CNAME` → stem `CNAME`, no fingerprint, no extension

/// Shortest fingerprint the pipeline will emit or strip.
pub const MIN_FINGERPRINT_LEN: usize = 8;
/// Longest fingerprint the pipeline will emit or strip.
pub const MAX_FINGERPRINT_LEN: usize = 12;

/// Result of parsing an asset filename like `style.3f9a1c2b.css`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAssetName {
    /// Filename without fingerprint and extension.
    pub stem: String,
    /// Embedded fingerprint, if the name already carries one.
    pub fingerprint: Option<String>,
    /// Extension without the leading dot.
    pub extension: Option<String>,
}

impl ParsedAssetName {
    /// Rebuild the filename with `fingerprint` embedded before the extension.
    ///
    /// Any fingerprint the name carried before is dropped, so repeated builds
    /// never accumulate nested hashes.
    pub fn with_fingerprint(&self, fingerprint: &str) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}.{}", self.stem, fingerprint, ext),
            None => format!("{}.{}", self.stem, fingerprint),
        }
    }
}

/// Whether `s` looks like a fingerprint this pipeline produces.
pub fn is_fingerprint(s: &str) -> bool {
    (MIN_FINGERPRINT_LEN..=MAX_FINGERPRINT_LEN).contains(&s.len())
        && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Parse an asset filename following the `name.<fingerprint>.ext` convention.
pub fn parse_asset_name(file_name: &str) -> ParsedAssetName {
    let (rest, extension) = match file_name.rsplit_once('.') {
        Some((rest, ext)) if !rest.is_empty() => (rest, Some(ext.to_string())),
        _ => (file_name, None),
    };

    if extension.is_some()
        && let Some((stem, candidate)) = rest.rsplit_once('.')
        && !stem.is_empty()
        && is_fingerprint(candidate)
    {
        return ParsedAssetName {
            stem: stem.to_string(),
            fingerprint: Some(candidate.to_string()),
            extension,
        };
    }

    ParsedAssetName {
        stem: rest.to_string(),
        fingerprint: None,
        extension,
    }
}

/// Human title for a project folder slug: `red-bike` → `Red Bike`.
pub fn title_from_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
