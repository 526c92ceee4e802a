//! Source discovery, pre-flight validation and the staging copy.
//!
//! Stage 1 of the build. Everything downstream works on lists produced here,
//! and every list is sorted by relative path, so two runs over the same tree
//! see files in the same order.
//!
//! ## Directory Structure
//!
//! ```text
//! site/                            # Project root
//! ├── site.toml                    # Build configuration (optional)
//! ├── index.html                   # Pages: root-level *.html, each with a <head>
//! ├── main.html
//! ├── css/                         # Required asset directories
//! │   └── style.css
//! ├── js/
//! │   └── app.js
//! ├── images/
//! │   ├── favicon.ico
//! │   ├── landing/                 # Hero images for index.html
//! │   ├── main/                    # Hero images for main.html
//! │   └── projects/<slug>/         # Per-project galleries
//! │       └── project.json         # { "title", "description" } (optional)
//! ├── partials/                    # Fragments: *.html without a <head> (optional)
//! ├── fonts/                       # Optional asset directory
//! ├── CNAME                        # Extra files, copied when present
//! ├── docs/                        # Live output (never scanned)
//! ├── .build-temp/                 # Staging (never scanned)
//! └── .docs-backup/                # Backup during a swap (never scanned)
//! ```
//!
//! Hidden entries and configured exclusions (`node_modules`, `.git`, …) are
//! skipped at every level.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::SiteConfig;
use crate::types::AssetRecord;
use crate::version::is_version_script;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Missing required source: {0}")]
    MissingSource(String),
}

/// Counts from the staging copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
}

/// Check the source tree before anything is written.
///
/// Every required asset directory must exist, and there must be at least one
/// root-level page.
pub fn validate_source(root: &Path, config: &SiteConfig) -> Result<(), ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingSource(format!(
            "project root {}",
            root.display()
        )));
    }
    for dir in &config.assets.required_dirs {
        if !root.join(dir).is_dir() {
            return Err(ScanError::MissingSource(format!("{dir}/")));
        }
    }
    if find_pages(root)?.is_empty() {
        return Err(ScanError::MissingSource("root-level *.html page".into()));
    }
    Ok(())
}

/// Root-level `*.html` files, sorted. Pages are the only files whose `<head>`
/// is reconstructed.
pub fn find_pages(root: &Path) -> Result<Vec<String>, ScanError> {
    let mut pages: Vec<String> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.') && has_extension(name, "html"))
        .collect();
    pages.sort();
    Ok(pages)
}

/// `*.html` files inside the asset directories (partials and other
/// fragments), sorted. Their references are rewritten but their heads are not.
pub fn find_fragments(root: &Path, config: &SiteConfig) -> Result<Vec<String>, ScanError> {
    let mut fragments = Vec::new();
    for dir in config.asset_dirs() {
        fragments.extend(
            walk_files(root, dir, config)?
                .into_iter()
                .filter(|rel| has_extension(rel, "html")),
        );
    }
    fragments.sort();
    Ok(fragments)
}

/// Every recognized asset under the asset directories, sorted by path.
pub fn discover_assets(root: &Path, config: &SiteConfig) -> Result<Vec<AssetRecord>, ScanError> {
    let mut assets = Vec::new();
    for dir in config.asset_dirs() {
        assets.extend(
            walk_files(root, dir, config)?
                .iter()
                .filter_map(|rel| AssetRecord::from_rel_path(rel)),
        );
    }
    assets.sort();
    Ok(assets)
}

/// All files under `root/dir`, as sorted `/`-separated paths relative to
/// `root`. A missing directory yields an empty list.
pub fn walk_files(root: &Path, dir: &str, config: &SiteConfig) -> Result<Vec<String>, ScanError> {
    let start = root.join(dir);
    if !start.is_dir() {
        return Ok(Vec::new());
    }
    let control = config.control_dirs();
    let mut files = Vec::new();
    let walker = WalkDir::new(&start)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.file_name(), &control));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(rel_path(root, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

/// Copy pages, asset directories and extra files from `root` into `staging`.
pub fn copy_source(root: &Path, staging: &Path, config: &SiteConfig) -> Result<CopyStats, ScanError> {
    let mut stats = CopyStats::default();

    for page in find_pages(root)? {
        copy_file(&root.join(&page), &staging.join(&page), &mut stats)?;
    }
    for dir in config.asset_dirs() {
        for rel in walk_files(root, dir, config)? {
            // regenerated every build
            if is_version_script(&rel) {
                warn!("skipping stale version script {}", rel);
                continue;
            }
            copy_file(&root.join(&rel), &staging.join(&rel), &mut stats)?;
        }
    }
    for extra in &config.assets.extra_files {
        let src = root.join(extra);
        if src.is_file() {
            copy_file(&src, &staging.join(extra), &mut stats)?;
        }
    }

    debug!("copied {} files ({} bytes) to staging", stats.files, stats.bytes);
    Ok(stats)
}

fn copy_file(src: &Path, dst: &Path, stats: &mut CopyStats) -> Result<(), ScanError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    stats.bytes += fs::copy(src, dst)?;
    stats.files += 1;
    Ok(())
}

/// Total size of every file under `dir`, in bytes.
pub fn tree_size(dir: &Path) -> Result<u64, ScanError> {
    let mut total = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Path of `path` relative to `root`, always `/`-separated.
pub fn rel_path(root: &Path, path: &Path) -> String {
    let relative: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded(name: &OsStr, control: &[&str]) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || control.iter().any(|c| name == *c)
}

fn has_extension(name: &str, ext: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext))
}
