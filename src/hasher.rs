//! Content hashing and fingerprint renaming.
//!
//! Every eligible asset in the staging tree is renamed to embed a fingerprint
//! of its own bytes: `css/style.css` becomes `css/style.3f9a1c2b.css`. The
//! fingerprint is derived from content only (never path or mtime), so the same
//! bytes produce the same name on every machine and every run.
//!
//! ## Tiers
//!
//! Assets are hashed in tiers ([`Hasher::hash_tier`]). Within a tier, files
//! are read and fingerprinted in parallel on the rayon pool, then assigned
//! names and renamed sequentially in path order. Names therefore never depend
//! on thread scheduling. The pipeline uses tiers to hash leaf assets (images,
//! fonts) before the stylesheets that reference them, so a stylesheet can be
//! rewritten first and fingerprinted with its final content.
//!
//! ## Collisions
//!
//! Two files with identical content legitimately share a fingerprint. When a
//! truncated fingerprint is already owned by *different* content, or the
//! resulting path is already taken, the fingerprint is perturbed: the next
//! candidate is derived from a secondary hash of the content digest and an
//! attempt counter. The sequence is fixed for given content, so resolution is
//! deterministic. If the retry budget runs out the build fails with
//! [`HashError::RenameConflict`].

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::naming::parse_asset_name;
use crate::types::{AssetRecord, RenameMap, RenameMapBuilder};

/// Perturbation attempts before giving up on a colliding fingerprint.
pub const DEFAULT_RETRY_BUDGET: u32 = 64;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot read asset {path}: {source}")]
    AssetRead {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("rename conflict: {path} cannot be given a unique name (last tried {hashed} after {attempts} attempts)")]
    RenameConflict {
        path: String,
        hashed: String,
        attempts: u32,
    },
}

/// Produces the full lowercase hex digest used as a fingerprint source.
///
/// The hasher truncates the result, so implementations should return at
/// least [`MAX_FINGERPRINT_LEN`](crate::naming::MAX_FINGERPRINT_LEN) chars.
pub trait Fingerprinter: Sync {
    fn digest(&self, bytes: &[u8]) -> String;
}

/// SHA-256 fingerprints, the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

impl Fingerprinter for Sha256Fingerprinter {
    fn digest(&self, bytes: &[u8]) -> String {
        sha256_hex(bytes)
    }
}

/// SHA-256 of a byte slice, as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// One renamed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedAsset {
    pub original: String,
    pub hashed: String,
    pub bytes: u64,
}

/// Fingerprint work done off the main thread for one file.
struct Digested<'r> {
    record: &'r AssetRecord,
    fingerprint: String,
    /// Full SHA-256 of the content; tells genuine duplicates from collisions
    /// regardless of which [`Fingerprinter`] is in use.
    content_id: String,
    bytes: u64,
}

/// Owns the [`RenameMapBuilder`] for the duration of the hashing phase.
pub struct Hasher<'f, F: Fingerprinter + ?Sized> {
    root: PathBuf,
    fingerprinter: &'f F,
    length: usize,
    retry_budget: u32,
    builder: RenameMapBuilder,
    /// Fingerprint → content id of the file that owns it.
    assigned: HashMap<String, String>,
    /// Hashed relative paths handed out so far.
    taken: HashSet<String>,
    total_bytes: u64,
}

impl<'f, F: Fingerprinter + ?Sized> Hasher<'f, F> {
    /// A hasher renaming files under `root`, keeping `length` hex chars.
    pub fn new(root: &Path, fingerprinter: &'f F, length: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            fingerprinter,
            length,
            retry_budget: DEFAULT_RETRY_BUDGET,
            builder: RenameMapBuilder::new(),
            assigned: HashMap::new(),
            taken: HashSet::new(),
            total_bytes: 0,
        }
    }

    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts;
        self
    }

    /// Fingerprint and rename one tier of assets.
    ///
    /// Records already present in the map are skipped, so each asset is
    /// hashed exactly once per build.
    pub fn hash_tier(&mut self, records: &[AssetRecord]) -> Result<Vec<HashedAsset>, HashError> {
        let mut pending: Vec<&AssetRecord> = records
            .iter()
            .filter(|r| !self.builder.view().contains(&r.rel_path))
            .collect();
        pending.sort();
        pending.dedup_by(|a, b| a.rel_path == b.rel_path);

        let root = &self.root;
        let fingerprinter = self.fingerprinter;
        let length = self.length;
        let digested: Vec<Digested> = pending
            .par_iter()
            .map(|record| digest_asset(root, fingerprinter, length, record))
            .collect::<Result<_, _>>()?;

        let mut hashed = Vec::with_capacity(digested.len());
        for d in digested {
            let original = d.record.rel_path.clone();
            let target = self.assign(&d)?;
            if target != original {
                fs::rename(self.root.join(&original), self.root.join(&target))?;
            }
            debug!("hashed {} -> {}", original, target);
            self.builder.insert(original.clone(), target.clone());
            self.total_bytes += d.bytes;
            hashed.push(HashedAsset {
                original,
                hashed: target,
                bytes: d.bytes,
            });
        }
        Ok(hashed)
    }

    /// Everything mapped so far, for rewriting files between tiers.
    pub fn rename_map(&self) -> &RenameMap {
        self.builder.view()
    }

    /// Total size of all hashed assets, in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// End the hashing phase. The returned map can no longer change.
    pub fn finish(self) -> RenameMap {
        self.builder.freeze()
    }

    fn assign(&mut self, d: &Digested) -> Result<String, HashError> {
        let original = &d.record.rel_path;
        let mut candidate = d.fingerprint.clone();
        let mut target = hashed_rel_path(original, &candidate);

        for attempt in 0..=self.retry_budget {
            if attempt > 0 {
                candidate = perturb(&d.content_id, attempt, self.length);
                target = hashed_rel_path(original, &candidate);
            }
            if self.is_free(&candidate, &d.content_id, &target, original) {
                if attempt > 0 {
                    warn!(
                        "fingerprint collision for {}: {} taken, using {}",
                        original, d.fingerprint, candidate
                    );
                }
                self.assigned.insert(candidate, d.content_id.clone());
                self.taken.insert(target.clone());
                return Ok(target);
            }
        }

        Err(HashError::RenameConflict {
            path: original.clone(),
            hashed: target,
            attempts: self.retry_budget + 1,
        })
    }

    fn is_free(&self, fingerprint: &str, content_id: &str, target: &str, source: &str) -> bool {
        if self
            .assigned
            .get(fingerprint)
            .is_some_and(|owner| owner != content_id)
        {
            return false;
        }
        if self.taken.contains(target) {
            return false;
        }
        target == source || !self.root.join(target).exists()
    }
}

fn digest_asset<'r, F: Fingerprinter + ?Sized>(
    root: &Path,
    fingerprinter: &F,
    length: usize,
    record: &'r AssetRecord,
) -> Result<Digested<'r>, HashError> {
    let bytes = fs::read(root.join(&record.rel_path)).map_err(|source| HashError::AssetRead {
        path: record.rel_path.clone(),
        source,
    })?;
    let full = fingerprinter.digest(&bytes);
    Ok(Digested {
        record,
        fingerprint: full.chars().take(length).collect(),
        content_id: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Deterministic replacement fingerprint for the given attempt.
fn perturb(content_id: &str, attempt: u32, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_id.as_bytes());
    hasher.update(b":");
    hasher.update(attempt.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..length].to_string()
}

/// `css/style.css` + `3f9a1c2b` → `css/style.3f9a1c2b.css`, dropping any
/// fingerprint the name already carried.
pub fn hashed_rel_path(rel_path: &str, fingerprint: &str) -> String {
    let (dir, file_name) = match rel_path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, rel_path),
    };
    let renamed = parse_asset_name(file_name).with_fingerprint(fingerprint);
    match dir {
        Some(dir) => format!("{dir}/{renamed}"),
        None => renamed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    /// Every input gets the same digest.
    struct ConstantFingerprinter;

    impl Fingerprinter for ConstantFingerprinter {
        fn digest(&self, _bytes: &[u8]) -> String {
            "deadbeefdeadbeefdeadbeef".to_string()
        }
    }

    fn write(root: &Path, rel: &str, content: &str) -> AssetRecord {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        AssetRecord::from_rel_path(rel).unwrap()
    }

    // =========================================================================
    // Fingerprints and renaming
    // =========================================================================

    #[test]
    fn fingerprint_is_truncated_sha256_of_content() {
        let tmp = TempDir::new().unwrap();
        let record = write(tmp.path(), "css/style.css", "body{}");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);

        let hashed = hasher.hash_tier(&[record]).unwrap();

        let expected = format!("css/style.{}.css", &sha256_hex(b"body{}")[..8]);
        assert_eq!(hashed[0].hashed, expected);
        assert!(tmp.path().join(&expected).exists());
        assert!(!tmp.path().join("css/style.css").exists());
        assert_eq!(hasher.rename_map().get("css/style.css"), Some(expected.as_str()));
    }

    #[test]
    fn configurable_length() {
        let tmp = TempDir::new().unwrap();
        let record = write(tmp.path(), "js/app.js", "console.log(1)");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 12);
        let hashed = hasher.hash_tier(&[record]).unwrap();
        let fp = &sha256_hex(b"console.log(1)")[..12];
        assert_eq!(hashed[0].hashed, format!("js/app.{fp}.js"));
    }

    #[test]
    fn existing_fingerprint_is_replaced_not_nested() {
        let tmp = TempDir::new().unwrap();
        let record = write(tmp.path(), "css/app.0badf00d.css", "a{}");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);
        let hashed = hasher.hash_tier(&[record]).unwrap();
        let fp = &sha256_hex(b"a{}")[..8];
        assert_eq!(hashed[0].hashed, format!("css/app.{fp}.css"));
    }

    #[test]
    fn identical_content_shares_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "images/a.png", "same");
        let b = write(tmp.path(), "images/b.png", "same");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);
        hasher.hash_tier(&[a, b]).unwrap();
        let map = hasher.finish();
        let fp = &sha256_hex(b"same")[..8];
        assert_eq!(map.get("images/a.png"), Some(format!("images/a.{fp}.png").as_str()));
        assert_eq!(map.get("images/b.png"), Some(format!("images/b.{fp}.png").as_str()));
    }

    #[test]
    fn missing_file_is_asset_read_error() {
        let tmp = TempDir::new().unwrap();
        let record = AssetRecord::from_rel_path("css/gone.css").unwrap();
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);
        let err = hasher.hash_tier(&[record]).unwrap_err();
        assert!(matches!(err, HashError::AssetRead { ref path, .. } if path == "css/gone.css"));
    }

    #[test]
    fn already_mapped_records_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let record = write(tmp.path(), "css/a.css", "a{}");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);
        hasher.hash_tier(std::slice::from_ref(&record)).unwrap();
        // Second pass would fail to read the moved file if it were not skipped.
        let again = hasher.hash_tier(&[record]).unwrap();
        assert!(again.is_empty());
        assert_eq!(hasher.rename_map().len(), 1);
    }

    #[test]
    fn input_order_does_not_matter() {
        let run = |reverse: bool| {
            let tmp = TempDir::new().unwrap();
            let mut records = vec![
                write(tmp.path(), "css/a.css", "one"),
                write(tmp.path(), "css/b.css", "two"),
                write(tmp.path(), "css/c.css", "three"),
            ];
            if reverse {
                records.reverse();
            }
            let mut hasher = Hasher::new(tmp.path(), &ConstantFingerprinter, 8);
            hasher.hash_tier(&records).unwrap();
            hasher.finish()
        };
        assert_eq!(run(false), run(true));
    }

    #[test]
    fn total_bytes_accumulates_across_tiers() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "images/a.png", "1234");
        let b = write(tmp.path(), "css/b.css", "123456");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);
        hasher.hash_tier(&[a]).unwrap();
        hasher.hash_tier(&[b]).unwrap();
        assert_eq!(hasher.total_bytes(), 10);
    }

    // =========================================================================
    // Collisions
    // =========================================================================

    #[test]
    #[traced_test]
    fn forced_collision_gets_distinct_paths() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "css/a.css", "first");
        let b = write(tmp.path(), "css/b.css", "second");
        let mut hasher = Hasher::new(tmp.path(), &ConstantFingerprinter, 8);

        hasher.hash_tier(&[a, b]).unwrap();
        let map = hasher.finish();

        let first = map.get("css/a.css").unwrap();
        let second = map.get("css/b.css").unwrap();
        assert_eq!(first, "css/a.deadbeef.css");
        assert_ne!(parse_asset_name(second).fingerprint.as_deref(), Some("deadbeef"));
        assert!(tmp.path().join(first).exists());
        assert!(tmp.path().join(second).exists());
        assert!(logs_contain("fingerprint collision"));
    }

    #[test]
    fn collision_resolution_is_deterministic() {
        let run = || {
            let tmp = TempDir::new().unwrap();
            let a = write(tmp.path(), "css/a.css", "first");
            let b = write(tmp.path(), "css/b.css", "second");
            let mut hasher = Hasher::new(tmp.path(), &ConstantFingerprinter, 8);
            hasher.hash_tier(&[a, b]).unwrap();
            hasher.finish()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn exhausted_budget_is_rename_conflict() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "css/a.css", "first");
        let b = write(tmp.path(), "css/b.css", "second");
        let mut hasher = Hasher::new(tmp.path(), &ConstantFingerprinter, 8).with_retry_budget(0);
        let err = hasher.hash_tier(&[a, b]).unwrap_err();
        assert!(matches!(err, HashError::RenameConflict { ref path, .. } if path == "css/b.css"));
    }

    #[test]
    fn same_content_same_target_path_is_perturbed() {
        let tmp = TempDir::new().unwrap();
        let fp = &sha256_hex(b"x{}")[..8];
        // A stale hashed copy next to its source: both want the same name.
        let stale = write(tmp.path(), &format!("css/x.{fp}.css"), "x{}");
        let fresh = write(tmp.path(), "css/x.css", "x{}");
        let mut hasher = Hasher::new(tmp.path(), &Sha256Fingerprinter, 8);
        hasher.hash_tier(&[stale, fresh]).unwrap();
        let map = hasher.finish();
        assert_ne!(map.get("css/x.css"), map.get(&format!("css/x.{fp}.css")));
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn hashed_rel_path_keeps_directory_and_extension() {
        assert_eq!(hashed_rel_path("css/style.css", "abcdef12"), "css/style.abcdef12.css");
        assert_eq!(hashed_rel_path("favicon.ico", "abcdef12"), "favicon.abcdef12.ico");
        assert_eq!(
            hashed_rel_path("images/projects/red-bike/01.jpg", "abcdef12"),
            "images/projects/red-bike/01.abcdef12.jpg"
        );
    }
}
