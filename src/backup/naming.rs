//! Snapshot and export file naming
//!
//! Export files live in `{dest}/{pool}/{image}/` and are named after what
//! was exported:
//!
//! - `{image}@{snapshot}.full`: full export of a snapshot
//! - `{image}@{snapshot}.diff_from_{base}`: diff export from snapshot `base`
//! - `{image}_{timestamp}.full` / `.diff_from_{base}`: export of the live image
//!
//! Any of these may carry a trailing `.tar.gz` once compressed. The base of
//! a diff is always the bare snapshot name, which is how the chain is linked.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;

use super::timestamp;
use crate::error::{BackupError, BackupResult};

/// Suffix of a full export
pub const FULL_SUFFIX: &str = ".full";

/// Suffix of a diff export, followed by `_{base}`
pub const DIFF_SUFFIX: &str = ".diff_from";

/// Suffix appended to a compressed export
pub const COMPRESSED_SUFFIX: &str = ".tar.gz";

/// Full name of a snapshot as the rbd tool sees it
pub fn snapshot_ref(image: &str, snapshot: &str) -> String {
    format!("{}@{}", image, snapshot)
}

/// What an export contains
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportKind {
    /// Standalone export, a chain root
    Full,
    /// Delta from the named base snapshot
    Diff { base: String },
}

impl ExportKind {
    pub fn diff_from(base: impl Into<String>) -> Self {
        Self::Diff { base: base.into() }
    }

    fn suffix(&self) -> String {
        match self {
            Self::Full => FULL_SUFFIX.to_string(),
            Self::Diff { base } => format!("{}_{}", DIFF_SUFFIX, base),
        }
    }
}

/// The thing being exported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// The live image, exported at `timestamp`
    Image { image: String, timestamp: String },
    /// A snapshot of the image; the snapshot name carries the timestamp
    Snapshot { image: String, snapshot: String },
}

impl ExportTarget {
    pub fn image(image: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn snapshot(image: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self::Snapshot {
            image: image.into(),
            snapshot: snapshot.into(),
        }
    }

    /// Root image name
    pub fn root_image(&self) -> &str {
        match self {
            Self::Image { image, .. } | Self::Snapshot { image, .. } => image,
        }
    }

    /// Reference passed to the export tool (`image` or `image@snapshot`)
    pub fn reference(&self) -> String {
        match self {
            Self::Image { image, .. } => image.clone(),
            Self::Snapshot { image, snapshot } => snapshot_ref(image, snapshot),
        }
    }

    fn file_stem(&self) -> String {
        match self {
            Self::Image { image, timestamp } => format!("{}_{}", image, timestamp),
            Self::Snapshot { image, snapshot } => snapshot_ref(image, snapshot),
        }
    }
}

/// File name of an export of `target`
pub fn export_file_name(target: &ExportTarget, kind: &ExportKind) -> String {
    format!("{}{}", target.file_stem(), kind.suffix())
}

/// Path of the compressed counterpart of an export
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

/// A recognized export file inside an image directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    /// File name as found on disk
    pub file_name: String,
    /// Snapshot name (or live-image timestamp) this export captures
    pub snapshot: String,
    /// Instant encoded in `snapshot`
    pub taken_at: DateTime<Utc>,
    pub kind: ExportKind,
    /// Whether this is an export of a snapshot rather than the live image
    pub from_snapshot: bool,
    pub compressed: bool,
}

impl ExportFile {
    pub fn is_diff(&self) -> bool {
        matches!(self.kind, ExportKind::Diff { .. })
    }

    /// Base snapshot of a diff export
    pub fn base(&self) -> Option<&str> {
        match &self.kind {
            ExportKind::Diff { base } => Some(base),
            ExportKind::Full => None,
        }
    }

    /// File name without the compression suffix
    pub fn raw_name(&self) -> &str {
        if self.compressed {
            self.file_name
                .strip_suffix(COMPRESSED_SUFFIX)
                .unwrap_or(&self.file_name)
        } else {
            &self.file_name
        }
    }
}

/// Recognizes the export files of one image
pub struct ExportNameParser {
    pattern: Regex,
}

impl ExportNameParser {
    pub fn new(image: &str) -> BackupResult<Self> {
        let expr = format!(
            r"^{image}(?P<sep>[@_])(?P<stamp>{prefix}UTC\d{{8}}T\d{{6}})(?:{full}|{diff}_(?P<base>[^./]+))(?P<gz>{gz})?$",
            image = regex::escape(image),
            prefix = regex::escape(timestamp::PREFIX),
            full = regex::escape(FULL_SUFFIX),
            diff = regex::escape(DIFF_SUFFIX),
            gz = regex::escape(COMPRESSED_SUFFIX),
        );
        let pattern = Regex::new(&expr)
            .map_err(|e| BackupError::Config(format!("Invalid export pattern for '{}': {}", image, e)))?;
        Ok(Self { pattern })
    }

    /// Parse a file name into an export record
    ///
    /// Fails with `UnrecognizedExport` for names outside the scheme and with
    /// `MalformedTimestamp` for well-shaped names carrying an impossible date.
    pub fn parse(&self, file_name: &str) -> BackupResult<ExportFile> {
        let caps = self
            .pattern
            .captures(file_name)
            .ok_or_else(|| BackupError::UnrecognizedExport(file_name.to_string()))?;

        let snapshot = caps["stamp"].to_string();
        let taken_at = timestamp::decode(&snapshot)?;
        let kind = match caps.name("base") {
            Some(base) => ExportKind::diff_from(base.as_str()),
            None => ExportKind::Full,
        };

        Ok(ExportFile {
            file_name: file_name.to_string(),
            snapshot,
            taken_at,
            kind,
            from_snapshot: &caps["sep"] == "@",
            compressed: caps.name("gz").is_some(),
        })
    }
}
