//! Shared test utilities for the cachesafe test suite.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! build(tmp.path(), &SiteConfig::default()).unwrap();
//!
//! let docs = tmp.path().join("docs");
//! let style = find_hashed(&docs, "css", "style", "css"); // "css/style.1a2b3c4d.css"
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::manifest::{ImageManifest, Project};
use crate::naming::parse_asset_name;

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/site/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate and build into without
/// affecting other tests or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/site");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

// =========================================================================
// Lookups (panic with a clear message on miss)
// =========================================================================

/// Find a project by slug. Panics if not found.
pub fn find_project<'a>(manifest: &'a ImageManifest, slug: &str) -> &'a Project {
    manifest
        .projects
        .iter()
        .find(|p| p.slug == slug)
        .unwrap_or_else(|| {
            let slugs: Vec<&str> = manifest.projects.iter().map(|p| p.slug.as_str()).collect();
            panic!("project '{slug}' not found. Available: {slugs:?}")
        })
}

/// The hashed file `dir/stem.<fp>.ext` under `root`, as a root-relative path.
/// Panics unless exactly one matches.
pub fn find_hashed(root: &Path, dir: &str, stem: &str, ext: &str) -> String {
    let names: Vec<String> = std::fs::read_dir(root.join(dir))
        .unwrap_or_else(|e| panic!("cannot list {dir}: {e}"))
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    let matches: Vec<&String> = names
        .iter()
        .filter(|name| {
            let parsed = parse_asset_name(name);
            parsed.stem == stem
                && parsed.fingerprint.is_some()
                && parsed.extension.as_deref() == Some(ext)
        })
        .collect();
    match matches.as_slice() {
        [one] => format!("{dir}/{one}"),
        _ => panic!("expected one hashed {stem}.*.{ext} in {dir}, found {matches:?} among {names:?}"),
    }
}
