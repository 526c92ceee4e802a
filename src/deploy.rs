//! Atomic deployment.
//!
//! A build is written into a staging directory and only becomes visible when
//! the staging directory is renamed onto the live directory. The previous
//! live tree is moved aside first and restored if promotion fails, so a
//! reader of the live directory sees either the old site or the new one,
//! never a mix.
//!
//! ## States
//!
//! ```text
//! Idle ──init_staging──▶ Staging ──deploy──▶ BackupPending ──▶ Swapping ──▶ Promoted ──▶ Committed
//!                                                  │               │            │
//!                                                  └──── failure ──┴────────────┴──▶ RolledBack
//! ```
//!
//! - `BackupPending`: a stale backup from an earlier failed run is removed.
//! - `Swapping`: the live directory (if any) has been renamed to the backup.
//! - `Promoted`: staging has been renamed to live.
//! - `Committed`: the backup has been deleted. If it still cannot be deleted
//!   after a few attempts, the previous site is put back and the deploy fails,
//!   so no backup directory outlives a run.
//!
//! Renames are only atomic within one filesystem, so the three directories
//! must live on the same volume.
//!
//! All filesystem calls go through [`DeployFs`] so faults can be injected.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SiteConfig;

/// Attempts at deleting the backup once the new site is live.
pub const BACKUP_REMOVAL_ATTEMPTS: u32 = 3;

/// The filesystem operations deployment needs.
pub trait DeployFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl DeployFs for OsFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Staging,
    BackupPending,
    Swapping,
    Promoted,
    Committed,
    RolledBack,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: DeployState,
    },
    #[error("deployment failed while {step}: {source} (live site unchanged)")]
    Failed {
        step: &'static str,
        #[source]
        source: io::Error,
    },
    #[error(
        "deployment failed while {step}: {source}; rollback also failed: {rollback} (previous site left at {})",
        backup.display()
    )]
    RollbackFailed {
        step: &'static str,
        source: io::Error,
        rollback: io::Error,
        backup: PathBuf,
    },
}

/// Drives one staging → live promotion.
pub struct Deployer<F: DeployFs = OsFs> {
    fs: F,
    staging: PathBuf,
    live: PathBuf,
    backup: PathBuf,
    state: DeployState,
}

impl Deployer<OsFs> {
    /// A deployer for the directories configured for the project at `root`.
    pub fn new(root: &Path, config: &SiteConfig) -> Self {
        Self::with_fs(OsFs, root, config)
    }
}

impl<F: DeployFs> Deployer<F> {
    pub fn with_fs(fs: F, root: &Path, config: &SiteConfig) -> Self {
        Self {
            fs,
            staging: root.join(&config.temp_dir),
            live: root.join(&config.output_dir),
            backup: root.join(&config.backup_dir),
            state: DeployState::Idle,
        }
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn live_dir(&self) -> &Path {
        &self.live
    }

    /// Create a fresh, empty staging directory, removing any leftover one.
    pub fn init_staging(&mut self) -> Result<(), DeployError> {
        if self.state != DeployState::Idle {
            return Err(DeployError::InvalidState {
                action: "initialize staging",
                state: self.state,
            });
        }
        if self.fs.exists(&self.staging) {
            debug!("removing leftover staging {}", self.staging.display());
            self.fs.remove_dir_all(&self.staging)?;
        }
        self.fs.create_dir_all(&self.staging)?;
        self.state = DeployState::Staging;
        Ok(())
    }

    /// Promote staging to live.
    ///
    /// On failure after the live directory has been moved aside, the previous
    /// live tree is restored before the error is returned. Staging is removed
    /// whatever the outcome.
    pub fn deploy(&mut self) -> Result<(), DeployError> {
        if self.state != DeployState::Staging {
            return Err(DeployError::InvalidState {
                action: "deploy",
                state: self.state,
            });
        }
        let result = self.swap();
        if let Err(e) = self.cleanup() {
            warn!("could not remove staging {}: {}", self.staging.display(), e);
        }
        result
    }

    fn swap(&mut self) -> Result<(), DeployError> {
        self.state = DeployState::BackupPending;
        if self.fs.exists(&self.backup) {
            debug!("removing stale backup {}", self.backup.display());
            // Live is untouched at this point; nothing to roll back.
            self.fs
                .remove_dir_all(&self.backup)
                .map_err(|source| DeployError::Failed {
                    step: "removing stale backup",
                    source,
                })?;
        }

        let had_live = self.fs.exists(&self.live);
        if had_live {
            self.fs
                .rename(&self.live, &self.backup)
                .map_err(|source| DeployError::Failed {
                    step: "moving live to backup",
                    source,
                })?;
        }
        self.state = DeployState::Swapping;

        if let Err(source) = self.fs.rename(&self.staging, &self.live) {
            return Err(self.rollback("promoting staging", source, had_live));
        }
        self.state = DeployState::Promoted;

        if had_live && let Err(source) = self.remove_backup() {
            return Err(self.rollback("removing backup", source, had_live));
        }
        self.state = DeployState::Committed;
        info!("deployed to {}", self.live.display());
        Ok(())
    }

    fn remove_backup(&self) -> io::Result<()> {
        let mut attempt = 1;
        loop {
            match self.fs.remove_dir_all(&self.backup) {
                Ok(()) => return Ok(()),
                Err(_) if !self.fs.exists(&self.backup) => return Ok(()),
                Err(e) if attempt >= BACKUP_REMOVAL_ATTEMPTS => return Err(e),
                Err(e) => {
                    debug!(
                        "removing backup {} failed (attempt {}): {}",
                        self.backup.display(),
                        attempt,
                        e
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// Put the backup back in place of a partial live directory.
    fn rollback(&mut self, step: &'static str, source: io::Error, had_live: bool) -> DeployError {
        warn!("deployment failed while {}: {}; rolling back", step, source);
        let restored = self.restore_backup(had_live);
        self.state = DeployState::RolledBack;
        match restored {
            Ok(()) => DeployError::Failed { step, source },
            Err(rollback) => DeployError::RollbackFailed {
                step,
                source,
                rollback,
                backup: self.backup.clone(),
            },
        }
    }

    fn restore_backup(&self, had_live: bool) -> io::Result<()> {
        if self.fs.exists(&self.live) {
            self.fs.remove_dir_all(&self.live)?;
        }
        if had_live {
            self.fs.rename(&self.backup, &self.live)?;
        }
        Ok(())
    }

    /// Remove the staging directory if it exists.
    pub fn cleanup(&mut self) -> Result<(), DeployError> {
        if self.fs.exists(&self.staging) {
            self.fs.remove_dir_all(&self.staging)?;
            debug!("removed staging {}", self.staging.display());
        }
        if self.state == DeployState::Staging {
            self.state = DeployState::Idle;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Real filesystem with injectable faults. Records every mutation.
    #[derive(Default)]
    pub struct FaultyFs {
        /// Fail any rename whose source ends with this directory name.
        pub fail_rename_from: Option<String>,
        /// Before failing, leave a half-written directory at the target.
        pub leave_partial: bool,
        /// Fail any removal of a directory with this name.
        pub fail_remove: Option<String>,
        /// Only fail the first this many matching removals.
        pub fail_remove_times: Option<usize>,
        pub operations: Mutex<Vec<String>>,
    }

    fn name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().to_string()
    }

    impl FaultyFs {
        pub fn get_operations(&self) -> Vec<String> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl DeployFs for FaultyFs {
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.operations
                .lock()
                .unwrap()
                .push(format!("rename {} {}", name(from), name(to)));
            if self.fail_rename_from.as_deref() == Some(name(from).as_str()) {
                if self.leave_partial {
                    fs::create_dir_all(to)?;
                    fs::write(to.join("partial.html"), "half")?;
                }
                return Err(io::Error::other("injected rename failure"));
            }
            fs::rename(from, to)
        }

        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            self.operations
                .lock()
                .unwrap()
                .push(format!("remove {}", name(path)));
            if self.fail_remove.as_deref() == Some(name(path).as_str()) {
                let attempts = self
                    .get_operations()
                    .iter()
                    .filter(|op| **op == format!("remove {}", name(path)))
                    .count();
                if self.fail_remove_times.is_none_or(|limit| attempts <= limit) {
                    return Err(io::Error::other("injected remove failure"));
                }
            }
            fs::remove_dir_all(path)
        }

        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            fs::create_dir_all(path)
        }

        fn exists(&self, path: &Path) -> bool {
            path.exists()
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(dir: &Path, rel: &str) -> String {
        fs::read_to_string(dir.join(rel)).unwrap()
    }

    fn staged<F: DeployFs>(fs: F, root: &Path) -> Deployer<F> {
        let mut deployer = Deployer::with_fs(fs, root, &SiteConfig::default());
        deployer.init_staging().unwrap();
        write(deployer.staging_dir(), "index.html", "new");
        deployer
    }

    // =========================================================================
    // Happy path
    // =========================================================================

    #[test]
    fn first_deploy_creates_live() {
        let tmp = TempDir::new().unwrap();
        let mut deployer = staged(OsFs, tmp.path());
        deployer.deploy().unwrap();

        assert_eq!(deployer.state(), DeployState::Committed);
        assert_eq!(read(&tmp.path().join("docs"), "index.html"), "new");
        assert!(!tmp.path().join(".build-temp").exists());
        assert!(!tmp.path().join(".docs-backup").exists());
    }

    #[test]
    fn deploy_replaces_live_and_removes_backup() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("docs"), "index.html", "old");
        write(&tmp.path().join("docs"), "stale.html", "old");
        let mut deployer = staged(OsFs, tmp.path());
        deployer.deploy().unwrap();

        let live = tmp.path().join("docs");
        assert_eq!(read(&live, "index.html"), "new");
        assert!(!live.join("stale.html").exists());
        assert!(!tmp.path().join(".docs-backup").exists());
    }

    #[test]
    fn stale_backup_removed_before_swap() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join(".docs-backup"), "index.html", "ancient");
        write(&tmp.path().join("docs"), "index.html", "old");
        let fs = FaultyFs::default();
        let mut deployer = staged(fs, tmp.path());
        deployer.deploy().unwrap();

        assert_eq!(
            deployer.fs.get_operations(),
            vec![
                "remove .docs-backup",
                "rename docs .docs-backup",
                "rename .build-temp docs",
                "remove .docs-backup",
            ]
        );
        assert!(!tmp.path().join(".docs-backup").exists());
    }

    #[test]
    fn init_staging_clears_leftovers() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join(".build-temp"), "junk.txt", "x");
        let mut deployer = Deployer::new(tmp.path(), &SiteConfig::default());
        deployer.init_staging().unwrap();
        assert_eq!(deployer.state(), DeployState::Staging);
        assert!(deployer.staging_dir().is_dir());
        assert!(!deployer.staging_dir().join("junk.txt").exists());
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn failed_promotion_restores_live() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("docs"), "index.html", "old");
        let fs = FaultyFs {
            fail_rename_from: Some(".build-temp".into()),
            leave_partial: true,
            ..FaultyFs::default()
        };
        let mut deployer = staged(fs, tmp.path());
        let err = deployer.deploy().unwrap_err();

        assert!(matches!(err, DeployError::Failed { step: "promoting staging", .. }));
        assert_eq!(deployer.state(), DeployState::RolledBack);
        let live = tmp.path().join("docs");
        assert_eq!(read(&live, "index.html"), "old");
        assert!(!live.join("partial.html").exists());
        assert!(!tmp.path().join(".docs-backup").exists());
        assert!(!tmp.path().join(".build-temp").exists());
    }

    #[test]
    fn failed_first_promotion_leaves_no_live() {
        let tmp = TempDir::new().unwrap();
        let fs = FaultyFs {
            fail_rename_from: Some(".build-temp".into()),
            leave_partial: true,
            ..FaultyFs::default()
        };
        let mut deployer = staged(fs, tmp.path());
        assert!(deployer.deploy().is_err());
        assert!(!tmp.path().join("docs").exists());
        assert!(!tmp.path().join(".build-temp").exists());
    }

    #[test]
    fn failed_backup_leaves_live_untouched() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("docs"), "index.html", "old");
        let fs = FaultyFs {
            fail_rename_from: Some("docs".into()),
            ..FaultyFs::default()
        };
        let mut deployer = staged(fs, tmp.path());
        let err = deployer.deploy().unwrap_err();

        assert!(matches!(err, DeployError::Failed { step: "moving live to backup", .. }));
        assert_eq!(read(&tmp.path().join("docs"), "index.html"), "old");
        assert!(!tmp.path().join(".build-temp").exists());
    }

    #[test]
    fn failed_rollback_is_reported() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("docs"), "index.html", "old");
        let fs = FaultyFs {
            fail_rename_from: Some(".build-temp".into()),
            leave_partial: true,
            fail_remove: Some("docs".into()),
            ..FaultyFs::default()
        };
        let mut deployer = staged(fs, tmp.path());
        let err = deployer.deploy().unwrap_err();

        assert!(matches!(err, DeployError::RollbackFailed { .. }));
        // the old site is still intact in the backup
        assert_eq!(read(&tmp.path().join(".docs-backup"), "index.html"), "old");
        assert!(err.to_string().contains(".docs-backup"));
    }

    #[test]
    fn persistent_backup_removal_failure_rolls_back() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("docs"), "index.html", "old");
        let fs = FaultyFs {
            fail_remove: Some(".docs-backup".into()),
            ..FaultyFs::default()
        };
        let mut deployer = staged(fs, tmp.path());
        let err = deployer.deploy().unwrap_err();

        assert!(matches!(err, DeployError::Failed { step: "removing backup", .. }));
        assert_eq!(deployer.state(), DeployState::RolledBack);
        assert_eq!(read(&tmp.path().join("docs"), "index.html"), "old");
        assert!(!tmp.path().join(".docs-backup").exists());
        assert!(!tmp.path().join(".build-temp").exists());
        assert_eq!(
            deployer.fs.get_operations(),
            vec![
                "rename docs .docs-backup",
                "rename .build-temp docs",
                "remove .docs-backup",
                "remove .docs-backup",
                "remove .docs-backup",
                "remove docs",
                "rename .docs-backup docs",
            ]
        );
    }

    #[test]
    fn transient_backup_removal_failure_is_retried() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("docs"), "index.html", "old");
        let fs = FaultyFs {
            fail_remove: Some(".docs-backup".into()),
            fail_remove_times: Some(2),
            ..FaultyFs::default()
        };
        let mut deployer = staged(fs, tmp.path());
        deployer.deploy().unwrap();

        assert_eq!(deployer.state(), DeployState::Committed);
        assert_eq!(read(&tmp.path().join("docs"), "index.html"), "new");
        assert!(!tmp.path().join(".docs-backup").exists());
    }

    #[test]
    fn deploy_requires_staging() {
        let tmp = TempDir::new().unwrap();
        let mut deployer = Deployer::new(tmp.path(), &SiteConfig::default());
        assert!(matches!(
            deployer.deploy(),
            Err(DeployError::InvalidState { action: "deploy", state: DeployState::Idle })
        ));
    }

    #[test]
    fn cleanup_removes_staging() {
        let tmp = TempDir::new().unwrap();
        let mut deployer = staged(OsFs, tmp.path());
        deployer.cleanup().unwrap();
        assert_eq!(deployer.state(), DeployState::Idle);
        assert!(!tmp.path().join(".build-temp").exists());
    }
}
