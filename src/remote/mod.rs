//! Remote collaborators of the backup engine
//!
//! The engine never talks to Ceph directly. It goes through two traits:
//!
//! - `SnapshotService`: lists images and snapshots, creates and removes
//!   snapshots
//! - `ExportTool`: validates references and streams full/diff exports (and
//!   compresses them) to local files
//!
//! `RbdCli` implements both by spawning the `rbd` and `tar` tools.

use std::path::Path;

use serde::Deserialize;

use crate::error::BackupResult;

#[cfg(test)]
pub(crate) mod memory;
pub mod rbd;

pub use rbd::RbdCli;

/// A snapshot of an image as reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snapshot {
    /// Identifier assigned by the remote service
    pub id: u64,
    pub name: String,
    /// Provisioned size in bytes
    #[serde(default)]
    pub size: u64,
}

/// Snapshot management on the remote pool
pub trait SnapshotService {
    /// All images in the pool
    fn list_images(&self, pool: &str) -> BackupResult<Vec<String>>;

    /// All snapshots of an image, oldest first
    ///
    /// Ordering is the service's responsibility; the engine relies on the
    /// position of each snapshot in the returned list.
    fn list_snapshots(&self, pool: &str, image: &str) -> BackupResult<Vec<Snapshot>>;

    fn create_snapshot(&self, pool: &str, image: &str, name: &str) -> BackupResult<()>;

    fn delete_snapshot(&self, pool: &str, image: &str, name: &str) -> BackupResult<()>;
}

/// Export of images and snapshots to local files
pub trait ExportTool {
    /// Fails with `NotFound` if `reference` (`image` or `image@snap`) is missing
    fn validate_exists(&self, pool: &str, reference: &str) -> BackupResult<()>;

    fn export_full(&self, pool: &str, reference: &str, dest: &Path) -> BackupResult<()>;

    /// Export the changes between snapshot `base` and `reference`
    fn export_diff(&self, pool: &str, base: &str, reference: &str, dest: &Path)
        -> BackupResult<()>;

    /// Write a compressed archive of `src` to `dest`, leaving `src` in place
    fn compress(&self, src: &Path, dest: &Path) -> BackupResult<()>;
}
