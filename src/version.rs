//! Build version stamp.
//!
//! One identifier per build, derived only from the sorted rename map and the
//! manifest content, so identical sources give identical versions. It is
//! exposed to pages through `js/build-version.<fp>.js`:
//!
//! ```js
//! window.__BUILD_VERSION__ = "0123456789ab";
//! ```
//!
//! The version file has to be a hashed asset itself, but its payload depends
//! on the finished map. So a placeholder carrying a preliminary version
//! (computed from an empty map) is written before script hashing, gets its
//! fingerprint like any other script, and then only its payload is replaced
//! by [`finalize`]. The filename keeps the placeholder's fingerprint.

use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::SiteConfig;
use crate::hasher::sha256_hex;
use crate::naming::parse_asset_name;
use crate::types::RenameMap;

/// Stem of the version script, before and after hashing.
pub const VERSION_STEM: &str = "build-version";
/// Hex characters in a version stamp.
pub const VERSION_LENGTH: usize = 12;

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("version file {0} was not hashed")]
    NotHashed(String),
}

#[derive(Serialize)]
struct VersionInput<'a> {
    renames: Vec<(&'a str, &'a str)>,
    manifest: &'a str,
}

/// Deterministic version for a map and manifest content.
pub fn compute_version(map: &RenameMap, manifest: &str) -> Result<String, VersionError> {
    let input = VersionInput {
        renames: map.iter().collect(),
        manifest,
    };
    let json = serde_json::to_string(&input)?;
    Ok(sha256_hex(json.as_bytes())[..VERSION_LENGTH].to_string())
}

pub fn version_file_content(version: &str) -> String {
    format!("window.__BUILD_VERSION__ = \"{version}\";\n")
}

/// Build-root-relative path of the unhashed version script.
pub fn version_file_rel(config: &SiteConfig) -> String {
    format!("{}/{}.js", config.assets.scripts_dir, VERSION_STEM)
}

/// Whether a path or reference names a version script, hashed or not.
pub fn is_version_script(path: &str) -> bool {
    let (path, _) = crate::rewrite::split_suffix(path);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let parsed = parse_asset_name(file_name);
    parsed.stem == VERSION_STEM && parsed.extension.as_deref() == Some("js")
}

/// Write the placeholder version script. Returns its relative path.
pub fn write_placeholder(root: &Path, config: &SiteConfig, version: &str) -> Result<String, VersionError> {
    let rel = version_file_rel(config);
    let path = root.join(&rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, version_file_content(version))?;
    debug!("wrote placeholder {} ({})", rel, version);
    Ok(rel)
}

/// Recompute the version from the final map and write it into the hashed
/// version script. Returns the final version.
pub fn finalize(
    root: &Path,
    config: &SiteConfig,
    map: &RenameMap,
    manifest: &str,
) -> Result<String, VersionError> {
    let hashed = hashed_version_file(map, config)
        .ok_or_else(|| VersionError::NotHashed(version_file_rel(config)))?;
    let version = compute_version(map, manifest)?;
    fs::write(root.join(hashed), version_file_content(&version))?;
    debug!("stamped {} with {}", hashed, version);
    Ok(version)
}

/// Hashed path of this build's version script, from the rename map. Stale
/// `build-version.*.js` files elsewhere in the tree are never picked.
pub fn hashed_version_file<'m>(map: &'m RenameMap, config: &SiteConfig) -> Option<&'m str> {
    map.get(&version_file_rel(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RenameMapBuilder;
    use tempfile::TempDir;

    fn map(entries: &[(&str, &str)]) -> RenameMap {
        let mut b = RenameMapBuilder::new();
        for (k, v) in entries {
            b.insert(k.to_string(), v.to_string());
        }
        b.freeze()
    }

    #[test]
    fn version_is_twelve_hex_chars() {
        let v = compute_version(&RenameMap::default(), "").unwrap();
        assert_eq!(v.len(), VERSION_LENGTH);
        assert!(v.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn version_is_deterministic() {
        let m = map(&[("css/a.css", "css/a.11111111.css")]);
        assert_eq!(
            compute_version(&m, "manifest").unwrap(),
            compute_version(&m, "manifest").unwrap()
        );
    }

    #[test]
    fn version_depends_on_map_and_manifest() {
        let a = map(&[("css/a.css", "css/a.11111111.css")]);
        let b = map(&[("css/a.css", "css/a.22222222.css")]);
        assert_ne!(compute_version(&a, "m").unwrap(), compute_version(&b, "m").unwrap());
        assert_ne!(compute_version(&a, "m").unwrap(), compute_version(&a, "n").unwrap());
    }

    #[test]
    fn version_ignores_insertion_order() {
        let mut x = RenameMapBuilder::new();
        x.insert("b".into(), "b.1".into());
        x.insert("a".into(), "a.1".into());
        let mut y = RenameMapBuilder::new();
        y.insert("a".into(), "a.1".into());
        y.insert("b".into(), "b.1".into());
        assert_eq!(
            compute_version(&x.freeze(), "").unwrap(),
            compute_version(&y.freeze(), "").unwrap()
        );
    }

    #[test]
    fn content_shape() {
        assert_eq!(
            version_file_content("0123456789ab"),
            "window.__BUILD_VERSION__ = \"0123456789ab\";\n"
        );
    }

    #[test]
    fn version_script_detection() {
        assert!(is_version_script("js/build-version.js"));
        assert!(is_version_script("/js/build-version.0123abcd.js?x=1"));
        assert!(!is_version_script("js/build-version-old.js"));
        assert!(!is_version_script("js/app.js"));
    }

    #[test]
    fn finalize_rewrites_payload_of_hashed_file() {
        let tmp = TempDir::new().unwrap();
        let config = SiteConfig::default();
        write_placeholder(tmp.path(), &config, "000000000000").unwrap();
        fs::rename(
            tmp.path().join("js/build-version.js"),
            tmp.path().join("js/build-version.abcdef12.js"),
        )
        .unwrap();
        let m = map(&[("js/build-version.js", "js/build-version.abcdef12.js")]);

        let version = finalize(tmp.path(), &config, &m, "{}").unwrap();

        let content = fs::read_to_string(tmp.path().join("js/build-version.abcdef12.js")).unwrap();
        assert_eq!(content, version_file_content(&version));
        assert_eq!(version, compute_version(&m, "{}").unwrap());
    }

    #[test]
    fn finalize_without_hashed_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = finalize(tmp.path(), &SiteConfig::default(), &RenameMap::default(), "").unwrap_err();
        assert!(matches!(err, VersionError::NotHashed(_)));
    }

    #[test]
    fn hashed_version_file_comes_from_the_map() {
        let config = SiteConfig::default();
        let m = map(&[
            ("js/build-version.00000000.js", "js/build-version.0badf00d.js"),
            ("js/build-version.js", "js/build-version.aaaaaaaa.js"),
        ]);
        assert_eq!(
            hashed_version_file(&m, &config),
            Some("js/build-version.aaaaaaaa.js")
        );
        assert_eq!(hashed_version_file(&RenameMap::default(), &config), None);
    }
}
