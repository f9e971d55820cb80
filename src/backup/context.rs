//! Explicit handle passed to every backup operation

use crate::backup::window::BackupWindow;
use crate::config::paths::BackupPaths;
use crate::config::settings::PoolProfile;
use crate::remote::{ExportTool, SnapshotService};

/// Everything an image workflow needs: the pool, where exports go, the
/// window, the run flags, and the remote collaborators.
pub struct BackupContext<'a> {
    pub pool: String,
    pub paths: BackupPaths,
    pub window: BackupWindow,
    pub compress: bool,
    pub check_mode: bool,
    pub snapshots: &'a dyn SnapshotService,
    pub exporter: &'a dyn ExportTool,
}

impl<'a> BackupContext<'a> {
    pub fn new(
        pool: impl Into<String>,
        paths: BackupPaths,
        snapshots: &'a dyn SnapshotService,
        exporter: &'a dyn ExportTool,
    ) -> Self {
        Self {
            pool: pool.into(),
            paths,
            window: BackupWindow::default(),
            compress: false,
            check_mode: false,
            snapshots,
            exporter,
        }
    }

    /// Context for one pool section of the profile file
    pub fn from_profile(
        profile: &PoolProfile,
        snapshots: &'a dyn SnapshotService,
        exporter: &'a dyn ExportTool,
    ) -> Self {
        Self::new(
            profile.pool.clone(),
            BackupPaths::new(profile.destination.clone()),
            snapshots,
            exporter,
        )
        .with_window(profile.window)
        .with_compress(profile.compress)
        .with_check_mode(profile.check_mode)
    }

    pub fn with_window(mut self, window: BackupWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }
}
