//! Backup orchestration
//!
//! Drives one image at a time through the backup state machine:
//!
//! - no backup snapshot yet: snapshot and export it as the first chain root
//! - oldest snapshot inside the window: snapshot and diff from the previous one
//! - oldest snapshot outside the window: slide the chain to the oldest
//!   snapshot still inside, prune older exports and snapshots, then diff
//!
//! The state is recomputed from the remote listing on every run.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::actions::{Action, ActionLog};
use super::chain::ExportChain;
use super::context::BackupContext;
use super::lock::ImageLock;
use super::naming::{export_file_name, ExportKind, ExportTarget};
use super::timestamp;
use crate::config::settings::{BackupMode, ImageSelection};
use crate::error::BackupResult;

/// Branch of the state machine taken for an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupState {
    /// No backup snapshot existed; the new one became the chain root
    Uninitialized,
    /// The chain was extended with a diff export
    WithinWindow,
    /// The chain root moved forward to `new_base`
    WindowSlid { new_base: String },
    /// Standalone full export, snapshot dropped afterwards
    Full,
    /// A restore point and everything built on it was dropped
    Forgotten { snapshot: String },
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("new chain"),
            Self::WithinWindow => f.write_str("within window"),
            Self::WindowSlid { new_base } => write!(f, "window slid to {}", new_base),
            Self::Full => f.write_str("full"),
            Self::Forgotten { snapshot } => write!(f, "forgot {}", snapshot),
        }
    }
}

/// What happened to one image
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub image: String,
    pub state: BackupState,
    /// Actions performed, or planned in check mode
    pub actions: Vec<Action>,
    pub check_mode: bool,
}

/// Result of one image within a pool run
#[derive(Debug)]
pub struct ImageOutcome {
    pub image: String,
    pub result: BackupResult<ImageReport>,
}

impl ImageOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A backup snapshot with its decoded instant
#[derive(Debug, Clone, PartialEq, Eq)]
struct BackupSnapshot {
    name: String,
    taken_at: DateTime<Utc>,
}

/// Runs the backup workflows of one pool
pub struct Orchestrator<'a> {
    ctx: BackupContext<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: BackupContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &BackupContext<'a> {
        &self.ctx
    }

    /// Back up every selected image, one at a time
    ///
    /// A failing image does not stop the others. Only a failure to expand
    /// the selection fails the whole pool.
    pub fn run(&self, selection: &ImageSelection, mode: BackupMode) -> BackupResult<Vec<ImageOutcome>> {
        let images = self.images(selection)?;
        if images.is_empty() {
            warn!("No images to back up in pool '{}'", self.ctx.pool);
        }

        let outcomes = images
            .into_iter()
            .map(|image| {
                let result = self.backup_image(&image, mode, timestamp::now());
                if let Err(e) = &result {
                    error!("{}", e);
                }
                ImageOutcome { image, result }
            })
            .collect();

        Ok(outcomes)
    }

    /// Expand the selection into image names
    pub fn images(&self, selection: &ImageSelection) -> BackupResult<Vec<String>> {
        match selection {
            ImageSelection::All => self.ctx.snapshots.list_images(&self.ctx.pool),
            ImageSelection::Named(names) => Ok(names.clone()),
        }
    }

    /// Back up one image in the given mode
    pub fn backup_image(
        &self,
        image: &str,
        mode: BackupMode,
        now: DateTime<Utc>,
    ) -> BackupResult<ImageReport> {
        match mode {
            BackupMode::Full => self.full_backup(image, now),
            BackupMode::Incremental => self.incremental_backup(image, now),
        }
    }

    /// Standalone backup: snapshot, full export, drop the snapshot
    ///
    /// The snapshot is dropped even when the export fails; the export error
    /// is the one reported.
    pub fn full_backup(&self, image: &str, now: DateTime<Utc>) -> BackupResult<ImageReport> {
        let _lock = self.lock(image)?;
        let mut log = ActionLog::new(self.ctx.check_mode);
        let chain = ExportChain::new(&self.ctx, image);
        let name = timestamp::encode(now);

        info!("Full backup of {}/{}", self.ctx.pool, image);
        self.create_snapshot(&mut log, image, &name)
            .map_err(|e| e.during(image, "create snapshot"))?;

        let exported = chain
            .export_root(&mut log, &ExportTarget::snapshot(image, name.as_str()))
            .map_err(|e| e.during(image, "export"));
        let dropped = self
            .delete_snapshot(&mut log, image, &name)
            .map_err(|e| e.during(image, "delete snapshot"));
        exported?;
        dropped?;

        Ok(self.report(image, BackupState::Full, log))
    }

    /// Chained backup within the sliding window
    pub fn incremental_backup(&self, image: &str, now: DateTime<Utc>) -> BackupResult<ImageReport> {
        let _lock = self.lock(image)?;
        let mut log = ActionLog::new(self.ctx.check_mode);
        let chain = ExportChain::new(&self.ctx, image);

        // Listed once; the new snapshot is appended below rather than re-read
        let mut snapshots = self
            .backup_snapshots(image)
            .map_err(|e| e.during(image, "list snapshots"))?;
        let oldest = snapshots.first().cloned();
        let previous = snapshots.last().cloned();

        let current = BackupSnapshot {
            name: timestamp::encode(now),
            taken_at: timestamp::truncate(now),
        };
        info!(
            "Incremental backup of {}/{} ({} existing snapshots, window {})",
            self.ctx.pool,
            image,
            snapshots.len(),
            self.ctx.window
        );
        self.create_snapshot(&mut log, image, &current.name)
            .map_err(|e| e.during(image, "create snapshot"))?;
        snapshots.push(current.clone());

        let state = match oldest {
            None => {
                chain
                    .export_root(&mut log, &ExportTarget::snapshot(image, current.name.as_str()))
                    .map_err(|e| e.during(image, "export root"))?;
                BackupState::Uninitialized
            }
            Some(oldest) if self.ctx.window.is_outside(current.taken_at, oldest.taken_at) => {
                let new_base = snapshots
                    .iter()
                    .find(|s| !self.ctx.window.is_outside(current.taken_at, s.taken_at))
                    .cloned()
                    .unwrap_or_else(|| current.clone());
                info!("Window slides to {} for {}", new_base.name, image);

                chain
                    .export_root(&mut log, &ExportTarget::snapshot(image, new_base.name.as_str()))
                    .map_err(|e| e.during(image, "export root"))?;
                chain
                    .prune_older_than(&mut log, new_base.taken_at)
                    .map_err(|e| e.during(image, "prune exports"))?;

                let (expired, kept): (Vec<_>, Vec<_>) = snapshots
                    .into_iter()
                    .partition(|s| s.taken_at < new_base.taken_at);
                for snapshot in &expired {
                    self.delete_snapshot(&mut log, image, &snapshot.name)
                        .map_err(|e| e.during(image, "delete snapshot"))?;
                }
                snapshots = kept;

                BackupState::WindowSlid {
                    new_base: new_base.name,
                }
            }
            Some(_) => BackupState::WithinWindow,
        };

        // The diff needs the previous snapshot to have survived the slide
        if let Some(previous) = previous {
            let retained = snapshots.iter().any(|s| s.name == previous.name);
            let is_new_root = matches!(&state, BackupState::WindowSlid { new_base } if *new_base == current.name);
            if retained && !is_new_root && snapshots.len() > 1 {
                chain
                    .export_diff(
                        &mut log,
                        &ExportTarget::snapshot(image, current.name.as_str()),
                        &previous.name,
                    )
                    .map_err(|e| e.during(image, "export diff"))?;
            }
        }

        Ok(self.report(image, state, log))
    }

    /// Drop the restore point `snapshot` of `image`
    ///
    /// Removes its exports, every diff export built on it, and the remote
    /// snapshots left without any export. The chain is checked for cycles
    /// before anything is removed.
    pub fn forget(&self, image: &str, snapshot: &str) -> BackupResult<ImageReport> {
        timestamp::decode(snapshot).map_err(|e| e.during(image, "forget"))?;
        let _lock = self.lock(image)?;
        let mut log = ActionLog::new(self.ctx.check_mode);
        let chain = ExportChain::new(&self.ctx, image);

        let graph = chain.scan().map_err(|e| e.during(image, "scan exports"))?;
        graph
            .dependents(snapshot)
            .map_err(|e| e.during(image, "scan exports"))?;

        let own: Vec<String> = graph
            .exports_of(snapshot)
            .map(|e| e.file_name.clone())
            .collect();
        if own.is_empty() {
            // Fails with ExportNotFound
            let full = export_file_name(&ExportTarget::snapshot(image, snapshot), &ExportKind::Full);
            chain
                .delete_export_or_compressed(&mut log, &chain.dir().join(full), false)
                .map_err(|e| e.during(image, "delete export"))?;
        }
        for file_name in &own {
            chain
                .delete_export_or_compressed(&mut log, &chain.dir().join(file_name), false)
                .map_err(|e| e.during(image, "delete export"))?;
        }

        let dependents = chain
            .delete_dependents(&mut log, snapshot)
            .map_err(|e| e.during(image, "delete dependents"))?;

        let removed: HashSet<&str> = own
            .iter()
            .map(String::as_str)
            .chain(dependents.iter().map(|e| e.file_name.as_str()))
            .collect();
        let orphaned: HashSet<&str> = graph
            .exports()
            .iter()
            .filter(|e| removed.contains(e.file_name.as_str()))
            .map(|e| e.snapshot.as_str())
            .chain(std::iter::once(snapshot))
            .filter(|name| {
                !graph
                    .exports_of(name)
                    .any(|e| !removed.contains(e.file_name.as_str()))
            })
            .collect();

        let remote = self
            .backup_snapshots(image)
            .map_err(|e| e.during(image, "list snapshots"))?;
        for remote_snapshot in remote.iter().filter(|s| orphaned.contains(s.name.as_str())) {
            self.delete_snapshot(&mut log, image, &remote_snapshot.name)
                .map_err(|e| e.during(image, "delete snapshot"))?;
        }

        Ok(self.report(
            image,
            BackupState::Forgotten {
                snapshot: snapshot.to_string(),
            },
            log,
        ))
    }

    /// Backup snapshots of `image`, oldest first
    ///
    /// Snapshots without the reserved prefix are ignored; reserved names
    /// that fail to decode are skipped with a warning.
    fn backup_snapshots(&self, image: &str) -> BackupResult<Vec<BackupSnapshot>> {
        let listed = self.ctx.snapshots.list_snapshots(&self.ctx.pool, image)?;

        let mut snapshots = Vec::with_capacity(listed.len());
        for snapshot in listed {
            if !timestamp::is_reserved(&snapshot.name) {
                continue;
            }
            match timestamp::decode(&snapshot.name) {
                Ok(taken_at) => snapshots.push(BackupSnapshot {
                    name: snapshot.name,
                    taken_at,
                }),
                Err(e) => warn!("WARNING: skipping snapshot of {}: {}", image, e),
            }
        }
        Ok(snapshots)
    }

    /// Take the image lock, except in check mode
    fn lock(&self, image: &str) -> BackupResult<Option<ImageLock>> {
        if self.ctx.check_mode {
            return Ok(None);
        }
        ImageLock::acquire(&self.ctx.paths.lock_file(&self.ctx.pool, image))
            .map(Some)
            .map_err(|e| e.during(image, "lock"))
    }

    fn create_snapshot(&self, log: &mut ActionLog, image: &str, name: &str) -> BackupResult<()> {
        log.perform(
            Action::CreateSnapshot {
                image: image.to_string(),
                name: name.to_string(),
            },
            || self.ctx.snapshots.create_snapshot(&self.ctx.pool, image, name),
        )
    }

    fn delete_snapshot(&self, log: &mut ActionLog, image: &str, name: &str) -> BackupResult<()> {
        log.perform(
            Action::DeleteSnapshot {
                image: image.to_string(),
                name: name.to_string(),
            },
            || self.ctx.snapshots.delete_snapshot(&self.ctx.pool, image, name),
        )
    }

    fn report(&self, image: &str, state: BackupState, log: ActionLog) -> ImageReport {
        let check_mode = log.is_check_mode();
        info!(
            "{}/{}: {} ({} actions{})",
            self.ctx.pool,
            image,
            state,
            log.actions().len(),
            if check_mode { ", check mode" } else { "" }
        );
        ImageReport {
            image: image.to_string(),
            state,
            actions: log.into_actions(),
            check_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::window::{BackupWindow, WindowUnit};
    use crate::config::paths::BackupPaths;
    use crate::error::BackupError;
    use crate::remote::memory::MemoryCluster;
    use chrono::{Duration, TimeZone};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn name(n: i64) -> String {
        timestamp::encode(day(n))
    }

    fn listing(dir: &Path) -> Vec<String> {
        if !dir.exists() {
            return Vec::new();
        }
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn context<'a>(temp: &TempDir, cluster: &'a MemoryCluster) -> BackupContext<'a> {
        BackupContext::new("rbd", BackupPaths::new(temp.path()), cluster, cluster)
            .with_window(BackupWindow::new(2, WindowUnit::Days))
    }

    /// Seed the chain a daily incremental run would have left after `days`
    fn seed_chain(temp: &TempDir, cluster: &MemoryCluster, days: i64) {
        let dir = temp.path().join("rbd").join("vm1");
        fs::create_dir_all(&dir).unwrap();
        for n in 0..days {
            cluster.add_snapshot("vm1", &name(n));
            let file = if n == 0 {
                format!("vm1@{}.full", name(n))
            } else {
                format!("vm1@{}.diff_from_{}", name(n), name(n - 1))
            };
            fs::write(dir.join(file), "x").unwrap();
        }
    }

    #[test]
    fn test_uninitialized_first_run() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.incremental_backup("vm1", day(0)).unwrap();

        assert_eq!(report.state, BackupState::Uninitialized);
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(0)]);
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![format!("vm1@{}.full", name(0))]
        );
        assert_eq!(
            cluster.mutations(),
            vec![
                format!("snap create vm1@{}", name(0)),
                format!("export vm1@{}", name(0)),
            ]
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BackupState::Uninitialized.to_string(), "new chain");
        assert_eq!(
            BackupState::WindowSlid { new_base: name(2) }.to_string(),
            format!("window slid to {}", name(2))
        );
    }

    #[test]
    fn test_second_run_produces_diff() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 1);
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.incremental_backup("vm1", day(1)).unwrap();

        assert_eq!(report.state, BackupState::WithinWindow);
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![
                format!("vm1@{}.full", name(0)),
                format!("vm1@{}.diff_from_{}", name(1), name(0)),
            ]
        );
    }

    #[test]
    fn test_window_slide() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 4);
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.incremental_backup("vm1", day(4)).unwrap();

        assert_eq!(report.state, BackupState::WindowSlid { new_base: name(2) });
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(2), name(3), name(4)]);
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![
                format!("vm1@{}.full", name(2)),
                format!("vm1@{}.diff_from_{}", name(3), name(2)),
                format!("vm1@{}.diff_from_{}", name(4), name(3)),
            ]
        );
        assert_eq!(
            cluster.mutations(),
            vec![
                format!("snap create vm1@{}", name(4)),
                format!("export vm1@{}", name(2)),
                format!("snap rm vm1@{}", name(0)),
                format!("snap rm vm1@{}", name(1)),
                format!("export-diff {} -> vm1@{}", name(3), name(4)),
            ]
        );
    }

    #[test]
    fn test_slide_after_long_gap_roots_new_snapshot() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 2);
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.incremental_backup("vm1", day(10)).unwrap();

        assert_eq!(report.state, BackupState::WindowSlid { new_base: name(10) });
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(10)]);
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![format!("vm1@{}.full", name(10))]
        );
    }

    #[test]
    fn test_sequential_daily_runs_keep_chain_bounded() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        for n in 0..8 {
            orchestrator.incremental_backup("vm1", day(n)).unwrap();
        }

        assert_eq!(cluster.snapshot_names("vm1"), vec![name(5), name(6), name(7)]);
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![
                format!("vm1@{}.full", name(5)),
                format!("vm1@{}.diff_from_{}", name(6), name(5)),
                format!("vm1@{}.diff_from_{}", name(7), name(6)),
            ]
        );
    }

    #[test]
    fn test_check_mode_matches_live_run() {
        let check_temp = TempDir::new().unwrap();
        let check_cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&check_temp, &check_cluster, 4);
        let before = listing(&check_temp.path().join("rbd/vm1"));

        let check = Orchestrator::new(context(&check_temp, &check_cluster).with_check_mode(true))
            .incremental_backup("vm1", day(4))
            .unwrap();

        assert!(check.check_mode);
        assert!(check_cluster.mutations().is_empty());
        assert_eq!(check_cluster.snapshot_names("vm1").len(), 4);
        assert_eq!(listing(&check_temp.path().join("rbd/vm1")), before);
        assert!(!check_temp.path().join("rbd/.vm1.lock").exists());

        let live_temp = TempDir::new().unwrap();
        let live_cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&live_temp, &live_cluster, 4);
        let live = Orchestrator::new(context(&live_temp, &live_cluster))
            .incremental_backup("vm1", day(4))
            .unwrap();

        assert_eq!(check.state, live.state);
        let rebase = |actions: &[Action], root: &Path| -> Vec<String> {
            actions
                .iter()
                .map(|a| a.to_string().replace(&root.display().to_string(), "<dest>"))
                .collect()
        };
        assert_eq!(
            rebase(&check.actions, check_temp.path()),
            rebase(&live.actions, live_temp.path())
        );
    }

    #[test]
    fn test_sub_second_now_keeps_boundary_snapshot() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 4);
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator
            .incremental_backup("vm1", day(4) + Duration::milliseconds(500))
            .unwrap();

        // Day 2 is exactly one window before the new snapshot's timestamp
        assert_eq!(report.state, BackupState::WindowSlid { new_base: name(2) });
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(2), name(3), name(4)]);
    }

    #[test]
    fn test_check_mode_full_backup() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster).with_check_mode(true));

        let report = orchestrator.full_backup("vm1", day(0)).unwrap();

        assert_eq!(report.state, BackupState::Full);
        assert!(report
            .actions
            .iter()
            .any(|a| matches!(a, Action::ExportFull { .. })));
        assert!(report
            .actions
            .iter()
            .any(|a| matches!(a, Action::DeleteSnapshot { .. })));
        assert!(cluster.mutations().is_empty());
        assert!(cluster.snapshot_names("vm1").is_empty());
        assert!(listing(temp.path()).is_empty());
    }

    #[test]
    fn test_check_mode_forget() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 4);
        let before = listing(&temp.path().join("rbd/vm1"));
        let orchestrator = Orchestrator::new(context(&temp, &cluster).with_check_mode(true));

        let report = orchestrator.forget("vm1", &name(2)).unwrap();

        assert_eq!(report.state, BackupState::Forgotten { snapshot: name(2) });
        let removals = report
            .actions
            .iter()
            .filter(|a| matches!(a, Action::RemoveFile { .. }))
            .count();
        let drops = report
            .actions
            .iter()
            .filter(|a| matches!(a, Action::DeleteSnapshot { .. }))
            .count();
        assert_eq!((removals, drops), (2, 2));
        assert!(cluster.mutations().is_empty());
        assert_eq!(cluster.snapshot_names("vm1").len(), 4);
        assert_eq!(listing(&temp.path().join("rbd/vm1")), before);
    }

    #[test]
    fn test_check_mode_with_compression() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 1);
        let before = listing(&temp.path().join("rbd/vm1"));
        let orchestrator = Orchestrator::new(
            context(&temp, &cluster)
                .with_check_mode(true)
                .with_compress(true),
        );

        let report = orchestrator.incremental_backup("vm1", day(1)).unwrap();

        assert_eq!(report.state, BackupState::WithinWindow);
        assert!(report
            .actions
            .iter()
            .any(|a| matches!(a, Action::Compress { .. })));
        assert!(cluster.mutations().is_empty());
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(0)]);
        assert_eq!(listing(&temp.path().join("rbd/vm1")), before);
    }

    #[test]
    fn test_check_mode_on_empty_destination() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster).with_check_mode(true));

        let report = orchestrator.incremental_backup("vm1", day(0)).unwrap();

        assert_eq!(report.state, BackupState::Uninitialized);
        assert!(matches!(report.actions[0], Action::CreateSnapshot { .. }));
        assert!(!temp.path().join("rbd").exists());
        assert!(cluster.mutations().is_empty());
    }

    #[test]
    fn test_failure_is_wrapped_and_stops_the_image() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 1);
        cluster.fail_on("export_diff");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let err = orchestrator.incremental_backup("vm1", day(1)).unwrap_err();

        match &err {
            BackupError::Image { image, step, .. } => {
                assert_eq!(image, "vm1");
                assert_eq!(*step, "export diff");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root(), BackupError::RemoteCommandFailed { .. }));
        // The snapshot stays; no rollback
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(0), name(1)]);
        // The lock was released
        assert!(!temp.path().join("rbd/.vm1.lock").exists());
    }

    #[test]
    fn test_missing_image_fails_listing() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new();
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let err = orchestrator.incremental_backup("ghost", day(0)).unwrap_err();
        assert!(err.is_not_found());
        assert!(cluster.mutations().is_empty());
    }

    #[test]
    fn test_locked_image_is_refused() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));
        let _held = ImageLock::acquire(&temp.path().join("rbd/.vm1.lock")).unwrap();

        let err = orchestrator.incremental_backup("vm1", day(0)).unwrap_err();
        assert!(matches!(err.root(), BackupError::Locked { .. }));
        assert!(cluster.mutations().is_empty());
    }

    #[test]
    fn test_foreign_snapshots_are_ignored() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        cluster.add_snapshot("vm1", "before-upgrade");
        cluster.add_snapshot("vm1", "BACKUPUTCgarbage");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.incremental_backup("vm1", day(0)).unwrap();

        assert_eq!(report.state, BackupState::Uninitialized);
        assert_eq!(
            cluster.snapshot_names("vm1"),
            vec!["before-upgrade".to_string(), "BACKUPUTCgarbage".to_string(), name(0)]
        );
    }

    #[test]
    fn test_compressed_chain() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster).with_compress(true));

        orchestrator.incremental_backup("vm1", day(0)).unwrap();
        orchestrator.incremental_backup("vm1", day(1)).unwrap();

        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![
                format!("vm1@{}.full.tar.gz", name(0)),
                format!("vm1@{}.diff_from_{}.tar.gz", name(1), name(0)),
            ]
        );
    }

    #[test]
    fn test_full_backup_drops_snapshot() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.full_backup("vm1", day(0)).unwrap();

        assert_eq!(report.state, BackupState::Full);
        assert!(cluster.snapshot_names("vm1").is_empty());
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![format!("vm1@{}.full", name(0))]
        );
    }

    #[test]
    fn test_full_backup_cleans_up_after_failed_export() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        cluster.fail_on("export_full");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let err = orchestrator.full_backup("vm1", day(0)).unwrap_err();

        assert!(matches!(err, BackupError::Image { step: "export", .. }));
        assert!(cluster.snapshot_names("vm1").is_empty());
    }

    #[test]
    fn test_run_expands_wildcard_and_isolates_failures() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1").with_image("vm2");
        cluster.fail_on("create_snapshot");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let outcomes = orchestrator
            .run(&ImageSelection::All, BackupMode::Incremental)
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].image, "vm1");
        assert!(!outcomes[0].is_success());
        assert_eq!(outcomes[1].image, "vm2");
        assert!(outcomes[1].is_success());
        assert_eq!(cluster.snapshot_names("vm2").len(), 1);
    }

    #[test]
    fn test_run_named_images() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1").with_image("vm2");
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let outcomes = orchestrator
            .run(&ImageSelection::parse("vm2, ghost").unwrap(), BackupMode::Full)
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].result.as_ref().unwrap_err().is_not_found());
    }

    #[test]
    fn test_forget_drops_point_and_dependents() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 4);
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let report = orchestrator.forget("vm1", &name(2)).unwrap();

        assert_eq!(report.state, BackupState::Forgotten { snapshot: name(2) });
        assert_eq!(cluster.snapshot_names("vm1"), vec![name(0), name(1)]);
        assert_eq!(
            listing(&temp.path().join("rbd/vm1")),
            vec![
                format!("vm1@{}.full", name(0)),
                format!("vm1@{}.diff_from_{}", name(1), name(0)),
            ]
        );

        // The next run continues the chain from the newest surviving point
        orchestrator.incremental_backup("vm1", day(3)).unwrap();
        assert!(temp
            .path()
            .join(format!("rbd/vm1/vm1@{}.diff_from_{}", name(3), name(1)))
            .exists());
    }

    #[test]
    fn test_forget_unknown_point() {
        let temp = TempDir::new().unwrap();
        let cluster = MemoryCluster::new().with_image("vm1");
        seed_chain(&temp, &cluster, 2);
        let orchestrator = Orchestrator::new(context(&temp, &cluster));

        let err = orchestrator.forget("vm1", &name(7)).unwrap_err();
        assert!(matches!(err.root(), BackupError::ExportNotFound { .. }));

        let err = orchestrator.forget("vm1", "manual").unwrap_err();
        assert!(matches!(err.root(), BackupError::MalformedTimestamp(_)));
        assert!(cluster.mutations().is_empty());
    }
}
