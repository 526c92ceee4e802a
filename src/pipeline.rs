//! Build orchestration.
//!
//! One build runs these phases strictly in order; no phase starts before the
//! previous one has finished:
//!
//! ```text
//! validate → stage copy → manifest scan → version placeholder
//!   → hash images + fonts → rewrite + hash stylesheets (import order)
//!   → write manifest → hash scripts → freeze map → stamp version
//!   → rewrite pages + fragments → reconstruct heads → verify → deploy
//! ```
//!
//! Hashing runs in dependency tiers so that every file is fingerprinted with
//! its final content: a stylesheet is rewritten against the images and fonts
//! it references before its own fingerprint is taken, and the manifest script
//! is written with hashed image paths before scripts are hashed.
//!
//! Any error before deployment removes the staging directory and leaves the
//! live site untouched. Errors during deployment are rolled back by the
//! [`Deployer`].

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SiteConfig};
use crate::deploy::{DeployError, DeployFs, Deployer, OsFs};
use crate::hasher::{Fingerprinter, HashError, HashedAsset, Hasher, Sha256Fingerprinter};
use crate::head::{HeadContext, HeadError, reconstruct_head};
use crate::manifest::{self, ImageManifest, ManifestError};
use crate::rewrite;
use crate::scan::{self, ScanError};
use crate::types::{AssetKind, AssetRecord, RenameMap};
use crate::verify::{self, VerifyError};
use crate::version::{self, VersionError};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("{page}: {source}")]
    Head {
        page: String,
        #[source]
        source: HeadError,
    },
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
}

/// What a successful build did.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Files copied into staging.
    pub staged_files: usize,
    /// Every renamed asset, in hashing order.
    pub hashed: Vec<HashedAsset>,
    /// Combined size of the hashed assets.
    pub hashed_bytes: u64,
    pub pages: usize,
    pub fragments: usize,
    pub images_in_manifest: usize,
    pub references_rewritten: usize,
    pub references_verified: usize,
    /// Size of the whole output tree.
    pub output_bytes: u64,
    pub version: String,
    pub live_dir: PathBuf,
    pub elapsed: Duration,
}

impl BuildSummary {
    pub fn hashed_of_kind(&self, kind: AssetKind) -> usize {
        self.hashed
            .iter()
            .filter(|h| AssetRecord::from_rel_path(&h.original).is_some_and(|r| r.kind == kind))
            .count()
    }
}

/// Everything a pre-flight check found, without building.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub pages: Vec<String>,
    pub fragments: Vec<String>,
    pub assets: Vec<AssetRecord>,
    pub manifest: ImageManifest,
}

/// Validate the project at `root` and report what a build would process.
pub fn check(root: &Path, config: &SiteConfig) -> Result<CheckReport, BuildError> {
    config.validate()?;
    scan::validate_source(root, config)?;
    Ok(CheckReport {
        pages: scan::find_pages(root)?,
        fragments: scan::find_fragments(root, config)?,
        assets: scan::discover_assets(root, config)?,
        manifest: manifest::scan_images(root, config)?,
    })
}

/// Build the project at `root` and deploy it to the live directory.
pub fn build(root: &Path, config: &SiteConfig) -> Result<BuildSummary, BuildError> {
    build_with(root, config, &Sha256Fingerprinter, OsFs)
}

/// [`build`] with an explicit fingerprinter and deployment filesystem.
pub fn build_with<F, D>(
    root: &Path,
    config: &SiteConfig,
    fingerprinter: &F,
    fs: D,
) -> Result<BuildSummary, BuildError>
where
    F: Fingerprinter + ?Sized,
    D: DeployFs,
{
    let start = Instant::now();
    config.validate()?;
    scan::validate_source(root, config)?;

    let mut deployer = Deployer::with_fs(fs, root, config);
    deployer.init_staging()?;
    let staging = deployer.staging_dir().to_path_buf();

    let mut summary = match stage(root, &staging, config, fingerprinter) {
        Ok(summary) => summary,
        Err(e) => {
            if let Err(cleanup) = deployer.cleanup() {
                warn!("could not remove staging {}: {}", staging.display(), cleanup);
            }
            return Err(e);
        }
    };

    deployer.deploy()?;
    summary.live_dir = deployer.live_dir().to_path_buf();
    summary.elapsed = start.elapsed();
    info!(
        "build {} complete: {} assets, {} pages in {:.2?}",
        summary.version,
        summary.hashed.len(),
        summary.pages,
        summary.elapsed
    );
    Ok(summary)
}

/// Every phase up to and including verification, inside `staging`.
fn stage<F: Fingerprinter + ?Sized>(
    root: &Path,
    staging: &Path,
    config: &SiteConfig,
    fingerprinter: &F,
) -> Result<BuildSummary, BuildError> {
    let copied = scan::copy_source(root, staging, config)?;
    info!("staged {} files ({} bytes)", copied.files, copied.bytes);

    let source_manifest = manifest::scan_images(staging, config)?;
    let preliminary = version::compute_version(&RenameMap::default(), &source_manifest.to_json()?)?;
    version::write_placeholder(staging, config, &preliminary)?;

    // Tier 1: leaves. Tier 2: stylesheets, each rewritten against the map so far.
    let mut hasher = Hasher::new(staging, fingerprinter, config.hashing.length);
    let (styles, leaves): (Vec<AssetRecord>, Vec<AssetRecord>) = scan::discover_assets(staging, config)?
        .into_iter()
        .filter(|a| a.kind != AssetKind::Script)
        .partition(|a| a.kind == AssetKind::Style);
    let mut hashed = hasher.hash_tier(&leaves)?;
    let mut rewritten = 0;
    for record in stylesheet_order(staging, &styles)? {
        rewritten += rewrite::rewrite_file(staging, &record.rel_path, hasher.rename_map())?;
        hashed.extend(hasher.hash_tier(std::slice::from_ref(&record))?);
    }

    // Tier 3: scripts, including the manifest and the version placeholder.
    let site_manifest = source_manifest.rewrite(hasher.rename_map());
    let manifest_json = site_manifest.to_json()?;
    site_manifest.write(staging, config)?;
    let scripts: Vec<AssetRecord> = scan::discover_assets(staging, config)?
        .into_iter()
        .filter(|a| a.kind == AssetKind::Script)
        .collect();
    hashed.extend(hasher.hash_tier(&scripts)?);

    let hashed_bytes = hasher.total_bytes();
    let map = hasher.finish();
    info!("hashed {} assets", map.len());

    let version = version::finalize(staging, config, &map, &manifest_json)?;

    let pages = scan::find_pages(staging)?;
    let fragments = scan::find_fragments(staging, config)?;
    let counts: Vec<usize> = pages
        .par_iter()
        .chain(fragments.par_iter())
        .map(|rel| rewrite::rewrite_file(staging, rel, &map))
        .collect::<Result<_, _>>()?;
    rewritten += counts.iter().sum::<usize>();
    debug!("rewrote {} references", rewritten);

    let ctx = HeadContext::discover(staging, config, &map, &site_manifest);
    pages
        .par_iter()
        .try_for_each(|rel| rebuild_page_head(staging, rel, &ctx))?;

    let verified = verify::verify_tree(staging, config)?;

    Ok(BuildSummary {
        staged_files: copied.files,
        hashed,
        hashed_bytes,
        pages: pages.len(),
        fragments: fragments.len(),
        images_in_manifest: site_manifest.all_images().count(),
        references_rewritten: rewritten,
        references_verified: verified.references,
        output_bytes: scan::tree_size(staging)?,
        version,
        live_dir: PathBuf::new(),
        elapsed: Duration::ZERO,
    })
}

fn rebuild_page_head(root: &Path, rel: &str, ctx: &HeadContext) -> Result<(), BuildError> {
    let path = root.join(rel);
    let html = fs::read_to_string(&path)?;
    let rebuilt = reconstruct_head(&html, rel, ctx).map_err(|source| BuildError::Head {
        page: rel.to_string(),
        source,
    })?;
    if rebuilt != html {
        fs::write(&path, rebuilt)?;
    }
    Ok(())
}

/// Stylesheets ordered so that each comes after every stylesheet it imports.
///
/// Ties are broken by path. An import cycle is broken at the edge that closes
/// it, with a warning.
pub fn stylesheet_order(root: &Path, styles: &[AssetRecord]) -> Result<Vec<AssetRecord>, BuildError> {
    let by_path: BTreeMap<&str, &AssetRecord> =
        styles.iter().map(|r| (r.rel_path.as_str(), r)).collect();
    let mut imports: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for &path in by_path.keys() {
        let css = fs::read_to_string(root.join(path))?;
        let deps = rewrite::css_imports(&css, path)
            .into_iter()
            .filter(|dep| by_path.contains_key(dep.as_str()) && dep != path)
            .collect();
        imports.insert(path, deps);
    }

    let mut ordered = Vec::with_capacity(styles.len());
    let mut done = BTreeSet::new();
    let mut visiting = BTreeSet::new();
    for &path in by_path.keys() {
        visit(path, &imports, &mut visiting, &mut done, &mut ordered);
    }
    Ok(ordered
        .into_iter()
        .filter_map(|path| by_path.get(path).map(|r| (*r).clone()))
        .collect())
}

fn visit<'a>(
    path: &'a str,
    imports: &'a BTreeMap<&'a str, Vec<String>>,
    visiting: &mut BTreeSet<&'a str>,
    done: &mut BTreeSet<&'a str>,
    ordered: &mut Vec<&'a str>,
) {
    if done.contains(path) {
        return;
    }
    visiting.insert(path);
    for dep in imports.get(path).into_iter().flatten() {
        if visiting.contains(dep.as_str()) {
            warn!("stylesheet import cycle: {} -> {}", path, dep);
            continue;
        }
        visit(dep.as_str(), imports, visiting, done, ordered);
    }
    visiting.remove(path);
    done.insert(path);
    ordered.push(path);
}
