//! Per-image advisory lock
//!
//! The lock is a file holding the pid of its owner, created with
//! `create_new` so two runs cannot both take it. A lock whose owner is no
//! longer running is stale and gets reclaimed. The lock is released when
//! the guard is dropped, on every exit path of the image workflow.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{BackupError, BackupResult};

/// Holds the lock file of one image until dropped
#[derive(Debug)]
pub struct ImageLock {
    path: PathBuf,
}

impl ImageLock {
    /// Take the lock at `path`, creating its directory if needed
    pub fn acquire(path: &Path) -> BackupResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!(
                    "Failed to create lock directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        for _ in 0..3 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let owner = match fs::read_to_string(path) {
                        Ok(text) => text.trim().to_string(),
                        Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    };
                    if owner_is_running(&owner) {
                        return Err(BackupError::Locked {
                            path: path.to_path_buf(),
                            pid: owner,
                        });
                    }
                    warn!("Reclaiming stale lock {} (pid {})", path.display(), owner);
                    match fs::remove_file(path) {
                        Ok(()) => continue,
                        Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) => {
                    return Err(BackupError::Io(format!(
                        "Failed to create lock {}: {}",
                        path.display(),
                        err
                    )))
                }
            }
        }

        Err(BackupError::Io(format!(
            "Failed to acquire lock {}",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        // Only release a lock that still records this process
        match fs::read_to_string(&self.path) {
            Ok(owner) if owner.trim() == std::process::id().to_string() => {
                let _ = fs::remove_file(&self.path);
            }
            Ok(owner) => warn!(
                "Not releasing {}: now held by pid '{}'",
                self.path.display(),
                owner.trim()
            ),
            Err(_) => {}
        }
    }
}

/// Whether the lock owner may still be running
///
/// Only a numeric pid without a `/proc` entry is stale. An empty or
/// unparseable owner is a lock whose creator has not written its pid yet.
fn owner_is_running(owner: &str) -> bool {
    match owner.parse::<u32>() {
        Ok(pid) if pid == std::process::id() => true,
        Ok(pid) => Path::new("/proc").join(pid.to_string()).exists(),
        Err(_) => true,
    }
}
