//! Reference verification.
//!
//! The last gate before deployment: every local reference in every output
//! HTML and CSS file must name a file that exists in the output tree. All
//! offenders are collected and reported together, and any offender fails the
//! build.
//!
//! Only references that load something are checked (stylesheets, scripts,
//! images, CSS `url()`/`@import`, `<link href>` and social images). Anchor
//! hrefs, media `src` and other meta content are rewritten when they match an
//! asset but may legitimately point at routes that are not files.

use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::SiteConfig;
use crate::rewrite::{TextKind, find_references, is_external, resolve_key, split_suffix};
use crate::scan::{self, ScanError};

/// A reference whose target is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dangling {
    /// File containing the reference, relative to the output root.
    pub source: String,
    /// The reference as written.
    pub reference: String,
}

impl fmt::Display for Dangling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.reference)
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("{} dangling reference(s):\n{}", .0.len(), format_dangling(.0))]
    DanglingReferences(Vec<Dangling>),
}

fn format_dangling(dangling: &[Dangling]) -> String {
    dangling
        .iter()
        .map(|d| format!("  {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyStats {
    pub files: usize,
    pub references: usize,
}

/// Check one file's references against the tree at `root`.
pub fn check_file(root: &Path, rel: &str) -> Result<(usize, Vec<Dangling>), VerifyError> {
    let Some(kind) = TextKind::from_path(rel) else {
        return Ok((0, Vec::new()));
    };
    let text = fs::read_to_string(root.join(rel))?;
    let mut checked = 0;
    let mut dangling = Vec::new();

    for reference in find_references(&text, kind) {
        if !reference.site.is_verified() || is_external(&reference.value) {
            continue;
        }
        checked += 1;
        let target = resolve_key(split_suffix(&reference.value).0, rel);
        if !target.is_some_and(|key| root.join(key).is_file()) {
            dangling.push(Dangling {
                source: rel.to_string(),
                reference: reference.value,
            });
        }
    }
    Ok((checked, dangling))
}

/// Every HTML and CSS file in the output tree: pages, fragments and
/// stylesheets anywhere under the asset directories.
pub fn verifiable_files(root: &Path, config: &SiteConfig) -> Result<Vec<String>, ScanError> {
    let mut files = scan::find_pages(root)?;
    for dir in config.asset_dirs() {
        files.extend(
            scan::walk_files(root, dir, config)?
                .into_iter()
                .filter(|rel| TextKind::from_path(rel).is_some()),
        );
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Verify the whole output tree at `root`.
pub fn verify_tree(root: &Path, config: &SiteConfig) -> Result<VerifyStats, VerifyError> {
    let files = verifiable_files(root, config)?;
    let results: Vec<(usize, Vec<Dangling>)> = files
        .par_iter()
        .map(|rel| check_file(root, rel))
        .collect::<Result<_, _>>()?;

    let mut stats = VerifyStats {
        files: files.len(),
        references: 0,
    };
    let mut dangling = Vec::new();
    for (checked, missing) in results {
        stats.references += checked;
        dangling.extend(missing);
    }

    if !dangling.is_empty() {
        return Err(VerifyError::DanglingReferences(dangling));
    }
    debug!("verified {} references in {} files", stats.references, stats.files);
    Ok(stats)
}
