//! `rbd` command line adapter
//!
//! Commands reference:
//!
//! ```text
//! rbd snap ls --format json rbd/test
//! rbd snap create rbd/test@snap
//! rbd export rbd/test@snap testexport
//! rbd export-diff --from-snap snap rbd/test@snap2 testexport
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{ExportTool, Snapshot, SnapshotService};
use crate::error::{BackupError, BackupResult};

/// Default location of the ceph client configuration
pub const DEFAULT_CEPH_CONF: &str = "/etc/ceph/ceph.conf";

/// Talks to the cluster through the `rbd` tool
#[derive(Debug, Clone)]
pub struct RbdCli {
    /// Path to the ceph client configuration
    conf: PathBuf,
    /// Prefix every command with `sudo`
    sudo: bool,
}

impl RbdCli {
    pub fn new(conf: impl Into<PathBuf>) -> Self {
        Self {
            conf: conf.into(),
            sudo: false,
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn conf(&self) -> &Path {
        &self.conf
    }

    fn command(&self, program: &str) -> Command {
        if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }

    fn rbd<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command("rbd");
        cmd.arg("--conf").arg(&self.conf).args(args);
        cmd
    }

    /// Run a command to completion, returning its stdout
    fn run(&self, mut cmd: Command) -> BackupResult<Vec<u8>> {
        let line = describe(&cmd);
        debug!("# {}", line);

        let output = cmd
            .output()
            .map_err(|e| BackupError::remote(line.clone(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let cause = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(BackupError::remote(line, cause));
        }

        Ok(output.stdout)
    }
}

impl SnapshotService for RbdCli {
    fn list_images(&self, pool: &str) -> BackupResult<Vec<String>> {
        let stdout = self.run(self.rbd(["ls", "--format", "json", pool]))?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    fn list_snapshots(&self, pool: &str, image: &str) -> BackupResult<Vec<Snapshot>> {
        let image_ref = format!("{}/{}", pool, image);
        let stdout = self.run(self.rbd(["snap", "ls", "--format", "json", image_ref.as_str()]))?;
        let mut snapshots: Vec<Snapshot> = serde_json::from_slice(&stdout)?;
        // rbd assigns ids in creation order
        snapshots.sort_by_key(|s| s.id);
        Ok(snapshots)
    }

    fn create_snapshot(&self, pool: &str, image: &str, name: &str) -> BackupResult<()> {
        let image_ref = format!("{}/{}@{}", pool, image, name);
        self.run(self.rbd(["snap", "create", image_ref.as_str()]))?;
        Ok(())
    }

    fn delete_snapshot(&self, pool: &str, image: &str, name: &str) -> BackupResult<()> {
        let image_ref = format!("{}/{}@{}", pool, image, name);
        self.run(self.rbd(["snap", "rm", image_ref.as_str()]))?;
        Ok(())
    }
}

impl ExportTool for RbdCli {
    fn validate_exists(&self, pool: &str, reference: &str) -> BackupResult<()> {
        let image_ref = format!("{}/{}", pool, reference);
        match self.run(self.rbd(["info", image_ref.as_str()])) {
            Ok(_) => Ok(()),
            Err(BackupError::RemoteCommandFailed { cause, .. })
                if cause.contains("No such file or directory") =>
            {
                Err(BackupError::not_found(pool, reference))
            }
            Err(e) => Err(e),
        }
    }

    fn export_full(&self, pool: &str, reference: &str, dest: &Path) -> BackupResult<()> {
        let image_ref = format!("{}/{}", pool, reference);
        let mut cmd = self.rbd(["export", image_ref.as_str()]);
        cmd.arg(dest);
        self.run(cmd)?;
        Ok(())
    }

    fn export_diff(
        &self,
        pool: &str,
        base: &str,
        reference: &str,
        dest: &Path,
    ) -> BackupResult<()> {
        let image_ref = format!("{}/{}", pool, reference);
        let mut cmd = self.rbd(["export-diff", "--from-snap", base, image_ref.as_str()]);
        cmd.arg(dest);
        self.run(cmd)?;
        Ok(())
    }

    fn compress(&self, src: &Path, dest: &Path) -> BackupResult<()> {
        let parent = src.parent().unwrap_or_else(|| Path::new("."));
        let name = src
            .file_name()
            .ok_or_else(|| BackupError::Io(format!("Not a file: {}", src.display())))?;

        // Sparse-aware gzip archive holding just the export file
        let mut cmd = self.command("tar");
        cmd.arg("-C").arg(parent).arg("-Scvzf").arg(dest).arg(name);
        self.run(cmd)?;
        Ok(())
    }
}

/// Render a command the way a shell would show it
fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
