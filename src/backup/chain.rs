//! Export chain management
//!
//! The exports of an image form a chain: every diff export names its base
//! snapshot, and full exports are the roots. The image directory is parsed
//! once per operation into a `ChainGraph` (records plus a base -> children
//! adjacency map) and all decisions are taken on that graph.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::actions::{Action, ActionLog};
use super::context::BackupContext;
use super::naming::{
    compressed_path, export_file_name, snapshot_ref, ExportFile, ExportKind, ExportNameParser,
    ExportTarget,
};
use crate::error::{BackupError, BackupResult};

/// Parsed view of one image directory
#[derive(Debug, Default)]
pub struct ChainGraph {
    exports: Vec<ExportFile>,
    /// Base snapshot name -> indices of the diff exports built on it
    children: HashMap<String, Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

impl ChainGraph {
    /// Read the export directory of `image`; a missing directory is empty
    pub fn scan(dir: &Path, image: &str) -> BackupResult<Self> {
        let parser = ExportNameParser::new(image)?;
        if !dir.exists() {
            return Ok(Self::default());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| {
            BackupError::Io(format!("Failed to read {}: {}", dir.display(), e))
        })? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let mut graph = Self::default();
        for name in names {
            match parser.parse(&name) {
                Ok(export) => graph.insert(export),
                Err(e) => warn!(
                    "WARNING: unexpected file in {}: {} ({})",
                    dir.display(),
                    name,
                    e
                ),
            }
        }
        Ok(graph)
    }

    /// Build a graph from already parsed records
    pub fn from_exports(exports: impl IntoIterator<Item = ExportFile>) -> Self {
        let mut graph = Self::default();
        for export in exports {
            graph.insert(export);
        }
        graph
    }

    fn insert(&mut self, export: ExportFile) {
        let index = self.exports.len();
        if let Some(base) = export.base() {
            self.children.entry(base.to_string()).or_default().push(index);
        }
        self.exports.push(export);
    }

    pub fn exports(&self) -> &[ExportFile] {
        &self.exports
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Diff exports whose base is `base`
    pub fn children<'g>(&'g self, base: &str) -> impl Iterator<Item = &'g ExportFile> + 'g {
        self.children
            .get(base)
            .into_iter()
            .flatten()
            .map(move |&index| &self.exports[index])
    }

    /// Exports of one snapshot
    pub fn exports_of<'g>(&'g self, snapshot: &'g str) -> impl Iterator<Item = &'g ExportFile> + 'g {
        self.exports.iter().filter(move |e| e.snapshot == snapshot)
    }

    /// Every diff export reachable from `base`, depth-first
    ///
    /// Fails with `CorruptChain` if the references loop back on themselves.
    pub fn dependents(&self, base: &str) -> BackupResult<Vec<&ExportFile>> {
        let mut visits = HashMap::new();
        let mut collected = HashSet::new();
        let mut order = Vec::new();
        self.visit(base, &mut visits, &mut collected, &mut order)?;
        Ok(order.into_iter().map(|index| &self.exports[index]).collect())
    }

    fn visit<'g>(
        &'g self,
        node: &'g str,
        visits: &mut HashMap<&'g str, Visit>,
        collected: &mut HashSet<usize>,
        order: &mut Vec<usize>,
    ) -> BackupResult<()> {
        visits.insert(node, Visit::InProgress);

        for &index in self.children.get(node).into_iter().flatten() {
            let child = self.exports[index].snapshot.as_str();
            match visits.get(child) {
                Some(Visit::InProgress) => {
                    return Err(BackupError::CorruptChain(child.to_string()))
                }
                Some(Visit::Done) => {}
                None => {
                    if collected.insert(index) {
                        order.push(index);
                    }
                    self.visit(child, visits, collected, order)?;
                    continue;
                }
            }
            if collected.insert(index) {
                order.push(index);
            }
        }

        visits.insert(node, Visit::Done);
        Ok(())
    }
}

/// Creates, prunes and deletes the exports of one image
pub struct ExportChain<'a> {
    ctx: &'a BackupContext<'a>,
    image: &'a str,
    dir: PathBuf,
}

impl<'a> ExportChain<'a> {
    pub fn new(ctx: &'a BackupContext<'a>, image: &'a str) -> Self {
        let dir = ctx.paths.image_dir(&ctx.pool, image);
        Self { ctx, image, dir }
    }

    /// Directory holding the exports of this image
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scan(&self) -> BackupResult<ChainGraph> {
        ChainGraph::scan(&self.dir, self.image)
    }

    /// Full export of `target`, a new chain root
    ///
    /// Returns the path of the final artifact (compressed if enabled).
    pub fn export_root(&self, log: &mut ActionLog, target: &ExportTarget) -> BackupResult<PathBuf> {
        let reference = target.reference();
        self.validate(log, target)?;
        let dest = self.destination(target, &ExportKind::Full)?;
        self.ensure_dir(log)?;

        let pool = &self.ctx.pool;
        log.perform(
            Action::ExportFull {
                reference: reference.clone(),
                dest: dest.clone(),
            },
            || self.ctx.exporter.export_full(pool, &reference, &dest),
        )?;

        self.finish(log, dest)
    }

    /// Diff export of `target` from the snapshot `base`
    pub fn export_diff(
        &self,
        log: &mut ActionLog,
        target: &ExportTarget,
        base: &str,
    ) -> BackupResult<PathBuf> {
        let reference = target.reference();
        self.validate(log, target)?;
        self.validate(log, &ExportTarget::snapshot(self.image, base))?;
        let dest = self.destination(target, &ExportKind::diff_from(base))?;
        self.ensure_dir(log)?;

        let pool = &self.ctx.pool;
        log.perform(
            Action::ExportDiff {
                base: base.to_string(),
                reference: reference.clone(),
                dest: dest.clone(),
            },
            || self.ctx.exporter.export_diff(pool, base, &reference, &dest),
        )?;

        self.finish(log, dest)
    }

    /// Remove every export older than the new chain base
    ///
    /// Diff exports taken at `new_base` itself go too: the new full export
    /// of that snapshot supersedes them. A full export still referenced by
    /// a diff that survives is kept. Returns the removed paths.
    pub fn prune_older_than(
        &self,
        log: &mut ActionLog,
        new_base: DateTime<Utc>,
    ) -> BackupResult<Vec<PathBuf>> {
        let graph = self.scan()?;

        let stale = |e: &ExportFile| e.taken_at < new_base || (e.taken_at == new_base && e.is_diff());
        let referenced: HashSet<&str> = graph
            .exports()
            .iter()
            .filter(|e| !stale(*e))
            .filter_map(|e| e.base())
            .collect();

        let mut removed = Vec::new();
        for export in graph.exports().iter().filter(|e| stale(*e)) {
            if !export.is_diff() && referenced.contains(export.snapshot.as_str()) {
                warn!(
                    "Keeping {}: still the base of a retained diff export",
                    export.file_name
                );
                continue;
            }
            let path = self.dir.join(&export.file_name);
            self.remove_file(log, &path)?;
            removed.push(path);
        }

        Ok(removed)
    }

    /// Delete every diff export built on `base`, recursively
    ///
    /// The whole dependency set is computed before anything is removed, so a
    /// corrupt chain fails without touching the directory.
    pub fn delete_dependents(
        &self,
        log: &mut ActionLog,
        base: &str,
    ) -> BackupResult<Vec<ExportFile>> {
        let graph = self.scan()?;
        let dependents: Vec<ExportFile> = graph.dependents(base)?.into_iter().cloned().collect();

        for export in &dependents {
            self.delete_export_or_compressed(log, &self.dir.join(&export.file_name), false)?;
        }

        Ok(dependents)
    }

    /// Delete `path`, or its compressed counterpart when only that exists
    ///
    /// With `soft`, a missing file is not an error.
    pub fn delete_export_or_compressed(
        &self,
        log: &mut ActionLog,
        path: &Path,
        soft: bool,
    ) -> BackupResult<Option<PathBuf>> {
        let compressed = compressed_path(path);
        let target = if path.exists() {
            path.to_path_buf()
        } else if compressed.exists() {
            compressed
        } else if soft {
            debug!("Nothing to delete at {}", path.display());
            return Ok(None);
        } else {
            return Err(BackupError::ExportNotFound {
                path: path.to_path_buf(),
                compressed,
            });
        };

        self.remove_file(log, &target)?;
        Ok(Some(target))
    }

    /// Check the export source exists remotely
    ///
    /// In check mode a snapshot this run would have created is taken as
    /// existing, since it was never really made.
    fn validate(&self, log: &ActionLog, target: &ExportTarget) -> BackupResult<()> {
        if let ExportTarget::Snapshot { image, snapshot } = target {
            if log.plans_snapshot(image, snapshot) {
                debug!("Skipping validation of planned snapshot {}", snapshot_ref(image, snapshot));
                return Ok(());
            }
        }
        self.ctx
            .exporter
            .validate_exists(&self.ctx.pool, &target.reference())
    }

    /// Destination path of an export, refusing to overwrite
    fn destination(&self, target: &ExportTarget, kind: &ExportKind) -> BackupResult<PathBuf> {
        let dest = self.dir.join(export_file_name(target, kind));
        if dest.exists() {
            return Err(BackupError::DestinationExists(dest));
        }
        let compressed = compressed_path(&dest);
        if compressed.exists() {
            return Err(BackupError::DestinationExists(compressed));
        }
        Ok(dest)
    }

    fn ensure_dir(&self, log: &mut ActionLog) -> BackupResult<()> {
        if self.dir.exists() {
            return Ok(());
        }
        let dir = &self.dir;
        log.perform(Action::CreateDir { path: dir.clone() }, || {
            fs::create_dir_all(dir).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })
        })
    }

    /// Compress the raw export when enabled, then drop the raw file
    ///
    /// A compression failure leaves the raw export in place.
    fn finish(&self, log: &mut ActionLog, dest: PathBuf) -> BackupResult<PathBuf> {
        if !self.ctx.compress {
            return Ok(dest);
        }

        let compressed = compressed_path(&dest);
        log.perform(
            Action::Compress {
                src: dest.clone(),
                dest: compressed.clone(),
            },
            || self.ctx.exporter.compress(&dest, &compressed),
        )?;
        self.remove_file(log, &dest)?;

        Ok(compressed)
    }

    fn remove_file(&self, log: &mut ActionLog, path: &Path) -> BackupResult<()> {
        log.perform(
            Action::RemoveFile {
                path: path.to_path_buf(),
            },
            || {
                fs::remove_file(path).map_err(|e| {
                    BackupError::Io(format!("Failed to remove {}: {}", path.display(), e))
                })
            },
        )
    }
}
