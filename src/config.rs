//! Build configuration module.
//!
//! Handles loading, validating, and merging `site.toml`. Stock defaults are
//! overridden by an optional `site.toml` at the project root; the file is
//! sparse, so it only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! output_dir = "docs"          # Live directory served by the web server
//! temp_dir = ".build-temp"     # Staging directory for the build in progress
//! backup_dir = ".docs-backup"  # Previous live tree, held only during a swap
//!
//! [site]
//! name = "Static Site"         # Used for og:title / twitter:title defaults
//! theme_color = "#111111"
//!
//! [assets]
//! required_dirs = ["css", "js", "images"]
//! optional_dirs = ["partials", "fonts"]
//! extra_files = ["CNAME", "robots.txt", "sitemap.xml", ".nojekyll"]
//! exclude_dirs = ["node_modules", ".git", "__pycache__"]
//!
//! [hashing]
//! length = 8                   # Fingerprint length in hex chars (8-12)
//!
//! [head]
//! font_preloads = 2
//! favicon = "images/favicon.ico"
//! touch_icon = "images/apple-touch-icon.png"
//! csp = ["default-src 'self'", "..."]
//!
//! [head.hero]
//! index = "landing"            # page stem -> manifest section
//! main = "main"
//!
//! [processing]
//! max_processes = 4            # Max parallel hashing workers (omit for auto)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::naming::{MAX_FINGERPRINT_LEN, MIN_FINGERPRINT_LEN};

/// Name of the optional config file at the project root.
pub const CONFIG_FILENAME: &str = "site.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `site.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Live directory, relative to the project root.
    pub output_dir: String,
    /// Staging directory, relative to the project root.
    pub temp_dir: String,
    /// Backup directory used during the swap, relative to the project root.
    pub backup_dir: String,
    pub site: SiteInfo,
    pub assets: AssetsConfig,
    pub hashing: HashingConfig,
    pub head: HeadConfig,
    pub processing: ProcessingConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_dir: "docs".to_string(),
            temp_dir: ".build-temp".to_string(),
            backup_dir: ".docs-backup".to_string(),
            site: SiteInfo::default(),
            assets: AssetsConfig::default(),
            hashing: HashingConfig::default(),
            head: HeadConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.hashing.length;
        if !(MIN_FINGERPRINT_LEN..=MAX_FINGERPRINT_LEN).contains(&len) {
            return Err(ConfigError::Validation(format!(
                "hashing.length must be {MIN_FINGERPRINT_LEN}-{MAX_FINGERPRINT_LEN}, got {len}"
            )));
        }
        let dirs = [&self.output_dir, &self.temp_dir, &self.backup_dir];
        if dirs.iter().any(|d| d.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "output_dir, temp_dir and backup_dir must not be empty".into(),
            ));
        }
        if self.output_dir == self.temp_dir
            || self.output_dir == self.backup_dir
            || self.temp_dir == self.backup_dir
        {
            return Err(ConfigError::Validation(
                "output_dir, temp_dir and backup_dir must be distinct".into(),
            ));
        }
        if self.site.name.trim().is_empty() {
            return Err(ConfigError::Validation("site.name must not be empty".into()));
        }
        if self.site.theme_color.trim().is_empty() {
            return Err(ConfigError::Validation(
                "site.theme_color must not be empty".into(),
            ));
        }
        if self.head.csp.is_empty() {
            return Err(ConfigError::Validation("head.csp must not be empty".into()));
        }
        Ok(())
    }

    /// Directory names the scanner must never descend into: the configured
    /// exclusions plus the three deployment directories.
    pub fn control_dirs(&self) -> Vec<&str> {
        let mut dirs: Vec<&str> = self.assets.exclude_dirs.iter().map(String::as_str).collect();
        dirs.push(&self.output_dir);
        dirs.push(&self.temp_dir);
        dirs.push(&self.backup_dir);
        dirs
    }

    /// Every asset directory, required first.
    pub fn asset_dirs(&self) -> impl Iterator<Item = &str> {
        self.assets
            .required_dirs
            .iter()
            .chain(self.assets.optional_dirs.iter())
            .map(String::as_str)
    }
}

/// Site identity used for generated head defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteInfo {
    /// Default for `og:title` and `twitter:title`.
    pub name: String,
    /// Default for `<meta name="theme-color">`.
    pub theme_color: String,
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            name: "Static Site".to_string(),
            theme_color: "#111111".to_string(),
        }
    }
}

/// Source layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    /// Directories that must exist before a build starts.
    pub required_dirs: Vec<String>,
    /// Directories copied and processed when present.
    pub optional_dirs: Vec<String>,
    /// Root-level files copied through untouched when present.
    pub extra_files: Vec<String>,
    /// Directory names skipped everywhere during discovery.
    pub exclude_dirs: Vec<String>,
    /// Directory holding images (manifest source, favicon location).
    pub images_dir: String,
    /// Directory holding scripts (manifest and version file destination).
    pub scripts_dir: String,
    /// Directory holding stylesheets (CSS preload source).
    pub styles_dir: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            required_dirs: vec!["css".into(), "js".into(), "images".into()],
            optional_dirs: vec!["partials".into(), "fonts".into()],
            extra_files: vec![
                "CNAME".into(),
                "robots.txt".into(),
                "sitemap.xml".into(),
                ".nojekyll".into(),
            ],
            exclude_dirs: vec![
                "node_modules".into(),
                ".git".into(),
                "__pycache__".into(),
            ],
            images_dir: "images".into(),
            scripts_dir: "js".into(),
            styles_dir: "css".into(),
        }
    }
}

/// Fingerprint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashingConfig {
    /// Number of hex characters kept from the content digest.
    pub length: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self { length: 8 }
    }
}

/// Head reconstruction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeadConfig {
    /// Content-Security-Policy directives, joined with `; `.
    pub csp: Vec<String>,
    /// Maximum number of font preloads per page.
    pub font_preloads: usize,
    /// Favicon source path, relative to the build root.
    pub favicon: String,
    /// Apple touch icon source path, relative to the build root.
    pub touch_icon: String,
    /// Page stem → manifest section whose first image is preloaded.
    pub hero: BTreeMap<String, String>,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            csp: vec![
                "default-src 'self'".into(),
                "img-src 'self' https: data:".into(),
                "script-src 'self' 'unsafe-inline'".into(),
                "style-src 'self' 'unsafe-inline'".into(),
                "font-src 'self' https:".into(),
                "object-src 'none'".into(),
                "base-uri 'self'".into(),
                "form-action 'self'".into(),
            ],
            font_preloads: 2,
            favicon: "images/favicon.ico".into(),
            touch_icon: "images/apple-touch-icon.png".into(),
            hero: BTreeMap::from([
                ("index".to_string(), "landing".to_string()),
                ("main".to_string(), "main".to_string()),
            ]),
        }
    }
}

impl HeadConfig {
    /// The policy string written into the generated CSP meta tag.
    pub fn csp_policy(&self) -> String {
        self.csp.join("; ")
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel fingerprinting workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SiteConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `site.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `site.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `site.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `site.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# cachesafe configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# Live directory served by the web server (replaced atomically on success).
output_dir = "docs"

# Staging directory for the build in progress. Removed on every exit path.
temp_dir = ".build-temp"

# Holds the previous live tree while the swap is in flight.
backup_dir = ".docs-backup"

# ---------------------------------------------------------------------------
# Site identity (generated head defaults)
# ---------------------------------------------------------------------------
[site]
name = "Static Site"
theme_color = "#111111"

# ---------------------------------------------------------------------------
# Source layout
# ---------------------------------------------------------------------------
[assets]
# Missing required directories abort the build before anything is written.
required_dirs = ["css", "js", "images"]
optional_dirs = ["partials", "fonts"]

# Root-level files copied through untouched when present.
extra_files = ["CNAME", "robots.txt", "sitemap.xml", ".nojekyll"]

# Directory names never scanned or copied.
exclude_dirs = ["node_modules", ".git", "__pycache__"]

images_dir = "images"
scripts_dir = "js"
styles_dir = "css"

# ---------------------------------------------------------------------------
# Fingerprints
# ---------------------------------------------------------------------------
[hashing]
# Hex characters of the SHA-256 content digest embedded in filenames (8-12).
length = 8

# ---------------------------------------------------------------------------
# <head> reconstruction
# ---------------------------------------------------------------------------
[head]
# Maximum number of font preloads per page (woff2 first).
font_preloads = 2

# Linked only when the file exists in the build.
favicon = "images/favicon.ico"
touch_icon = "images/apple-touch-icon.png"

# Content-Security-Policy directives, emitted as the last tag of every head.
csp = [
    "default-src 'self'",
    "img-src 'self' https: data:",
    "script-src 'self' 'unsafe-inline'",
    "style-src 'self' 'unsafe-inline'",
    "font-src 'self' https:",
    "object-src 'none'",
    "base-uri 'self'",
    "form-action 'self'",
]

# Page stem -> image manifest section whose first image is preloaded.
# Sections: "landing", "main", or a project slug.
[head.hero]
index = "landing"
main = "main"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel fingerprinting workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_config_layout() {
        let config = SiteConfig::default();
        assert_eq!(config.output_dir, "docs");
        assert_eq!(config.temp_dir, ".build-temp");
        assert_eq!(config.backup_dir, ".docs-backup");
        assert_eq!(config.assets.required_dirs, vec!["css", "js", "images"]);
        assert_eq!(config.hashing.length, 8);
    }

    #[test]
    fn default_hero_mapping() {
        let config = SiteConfig::default();
        assert_eq!(config.head.hero.get("index").map(String::as_str), Some("landing"));
        assert_eq!(config.head.hero.get("main").map(String::as_str), Some("main"));
    }

    #[test]
    fn csp_policy_joins_directives() {
        let head = HeadConfig {
            csp: vec!["default-src 'self'".into(), "object-src 'none'".into()],
            ..HeadConfig::default()
        };
        assert_eq!(head.csp_policy(), "default-src 'self'; object-src 'none'");
    }

    #[test]
    fn control_dirs_include_deployment_dirs() {
        let config = SiteConfig::default();
        let dirs = config.control_dirs();
        for d in ["docs", ".build-temp", ".docs-backup", "node_modules", ".git"] {
            assert!(dirs.contains(&d), "missing {d}");
        }
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.site.name, "Static Site");
    }

    #[test]
    fn load_config_merges_sparse_overlay() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            r##"
output_dir = "public"

[site]
name = "MotoSynteza"

[head.hero]
projects = "red-bike"
"##,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.output_dir, "public");
        assert_eq!(config.site.name, "MotoSynteza");
        // untouched keys keep stock values
        assert_eq!(config.site.theme_color, "#111111");
        assert_eq!(config.temp_dir, ".build-temp");
        // tables merge key-by-key
        assert_eq!(config.head.hero.len(), 3);
        assert_eq!(config.head.hero["projects"], "red-bike");
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "this is not toml [").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[site]\ntitle = \"x\"\n").unwrap();
        assert!(load_config(tmp.path()).is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[bundling]\nminify = true\n").unwrap();
        assert!(load_config(tmp.path()).is_err());
    }

    #[test]
    fn validate_hash_length_bounds() {
        let mut config = SiteConfig::default();
        config.hashing.length = 12;
        assert!(config.validate().is_ok());
        config.hashing.length = 7;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        config.hashing.length = 13;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_shared_directories() {
        let mut config = SiteConfig::default();
        config.temp_dir = "docs".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("distinct"), "{err}");
    }

    #[test]
    fn validate_rejects_empty_csp() {
        let mut config = SiteConfig::default();
        config.head.csp.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(SiteConfig::default().validate().is_ok());
    }

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["b"].as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base: toml::Value = toml::from_str("x = [1, 2, 3]").unwrap();
        let overlay: toml::Value = toml::from_str("x = [9]").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["x"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn effective_threads_zero_is_clamped_to_one() {
        let config = ProcessingConfig {
            max_processes: Some(0),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let parsed: SiteConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = SiteConfig::default();
        assert_eq!(parsed.output_dir, defaults.output_dir);
        assert_eq!(parsed.head.csp, defaults.head.csp);
        assert_eq!(parsed.head.hero, defaults.head.hero);
        assert_eq!(parsed.assets.extra_files, defaults.assets.extra_files);
        assert_eq!(parsed.hashing.length, defaults.hashing.length);
    }

    #[test]
    fn stock_defaults_value_is_table() {
        let value = stock_defaults_value().unwrap();
        assert!(value.is_table());
        assert!(value.get("head").is_some());
    }
}
