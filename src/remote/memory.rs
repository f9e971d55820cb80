//! In-memory cluster for tests
//!
//! Keeps images and snapshots in memory, writes small placeholder files for
//! exports, and records every mutating call so tests can assert on what the
//! engine actually did.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{ExportTool, Snapshot, SnapshotService};
use crate::error::{BackupError, BackupResult};

#[derive(Default)]
struct ClusterState {
    images: BTreeMap<String, Vec<Snapshot>>,
    next_id: u64,
    mutations: Vec<String>,
    fail_on: Option<String>,
}

/// Fake pool implementing both remote traits
#[derive(Default)]
pub struct MemoryCluster {
    state: RefCell<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state
            .borrow_mut()
            .images
            .entry(image.to_string())
            .or_default();
        self
    }

    /// Seed a snapshot without recording a mutation
    pub fn add_snapshot(&self, image: &str, name: &str) {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.images.entry(image.to_string()).or_default().push(Snapshot {
            id,
            name: name.to_string(),
            size: 1 << 30,
        });
    }

    pub fn snapshot_names(&self, image: &str) -> Vec<String> {
        self.state
            .borrow()
            .images
            .get(image)
            .map(|snaps| snaps.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Every mutating call made so far, in order
    pub fn mutations(&self) -> Vec<String> {
        self.state.borrow().mutations.clone()
    }

    /// Make the next call of the named operation fail
    pub fn fail_on(&self, operation: &str) {
        self.state.borrow_mut().fail_on = Some(operation.to_string());
    }

    fn check_failure(&self, operation: &str) -> BackupResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_on.as_deref() == Some(operation) {
            state.fail_on = None;
            return Err(BackupError::remote(operation, "injected failure"));
        }
        Ok(())
    }

    fn record(&self, mutation: String) {
        self.state.borrow_mut().mutations.push(mutation);
    }

    fn exists(&self, reference: &str) -> bool {
        let state = self.state.borrow();
        match reference.split_once('@') {
            Some((image, snap)) => state
                .images
                .get(image)
                .map_or(false, |snaps| snaps.iter().any(|s| s.name == snap)),
            None => state.images.contains_key(reference),
        }
    }
}

impl SnapshotService for MemoryCluster {
    fn list_images(&self, _pool: &str) -> BackupResult<Vec<String>> {
        Ok(self.state.borrow().images.keys().cloned().collect())
    }

    fn list_snapshots(&self, pool: &str, image: &str) -> BackupResult<Vec<Snapshot>> {
        self.state
            .borrow()
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| BackupError::not_found(pool, image))
    }

    fn create_snapshot(&self, pool: &str, image: &str, name: &str) -> BackupResult<()> {
        self.check_failure("create_snapshot")?;
        if !self.exists(image) {
            return Err(BackupError::not_found(pool, image));
        }
        if self.exists(&format!("{}@{}", image, name)) {
            return Err(BackupError::remote(
                "create_snapshot",
                format!("snapshot {}@{} already exists", image, name),
            ));
        }
        self.add_snapshot(image, name);
        self.record(format!("snap create {}@{}", image, name));
        Ok(())
    }

    fn delete_snapshot(&self, pool: &str, image: &str, name: &str) -> BackupResult<()> {
        self.check_failure("delete_snapshot")?;
        let mut state = self.state.borrow_mut();
        let snaps = state
            .images
            .get_mut(image)
            .ok_or_else(|| BackupError::not_found(pool, image))?;
        let before = snaps.len();
        snaps.retain(|s| s.name != name);
        if snaps.len() == before {
            return Err(BackupError::not_found(pool, format!("{}@{}", image, name)));
        }
        state.mutations.push(format!("snap rm {}@{}", image, name));
        Ok(())
    }
}

impl ExportTool for MemoryCluster {
    fn validate_exists(&self, pool: &str, reference: &str) -> BackupResult<()> {
        if self.exists(reference) {
            Ok(())
        } else {
            Err(BackupError::not_found(pool, reference))
        }
    }

    fn export_full(&self, _pool: &str, reference: &str, dest: &Path) -> BackupResult<()> {
        self.check_failure("export_full")?;
        fs::write(dest, format!("full {}\n", reference))?;
        self.record(format!("export {}", reference));
        Ok(())
    }

    fn export_diff(
        &self,
        _pool: &str,
        base: &str,
        reference: &str,
        dest: &Path,
    ) -> BackupResult<()> {
        self.check_failure("export_diff")?;
        fs::write(dest, format!("diff {} -> {}\n", base, reference))?;
        self.record(format!("export-diff {} -> {}", base, reference));
        Ok(())
    }

    fn compress(&self, src: &Path, dest: &Path) -> BackupResult<()> {
        self.check_failure("compress")?;
        fs::copy(src, dest)?;
        self.record(format!("compress {}", src.display()));
        Ok(())
    }
}
