//! Path management for rbd-backup
//!
//! All exports of an image live in `{dest}/{pool}/{image}/`. Lock files sit
//! next to the image directories, in the pool directory, so they never show
//! up while scanning an image's exports.

use std::path::{Path, PathBuf};

/// Default location of the profile file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/rbd-backup/rbd-backup.yaml";

/// Resolves the on-disk layout under a destination directory
#[derive(Debug, Clone)]
pub struct BackupPaths {
    /// Destination directory given in the profile or on the command line
    dest_dir: PathBuf,
}

impl BackupPaths {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
        }
    }

    /// Get the destination directory
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Directory holding every image of a pool
    pub fn pool_dir(&self, pool: &str) -> PathBuf {
        self.dest_dir.join(pool)
    }

    /// Directory holding the exports of one image
    pub fn image_dir(&self, pool: &str, image: &str) -> PathBuf {
        self.pool_dir(pool).join(image)
    }

    /// Lock file guarding one image
    pub fn lock_file(&self, pool: &str, image: &str) -> PathBuf {
        self.pool_dir(pool).join(format!(".{}.lock", image))
    }
}

/// Resolve the profile file path
///
/// `explicit` comes from `--conf` or `RBD_BACKUP_CONFIG`; without either the
/// default location is used.
pub fn resolve_config_file(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
