//! Custom error types for rbd-backup
//!
//! This module defines the error hierarchy for the backup engine using
//! thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration-related errors (unreadable or malformed profile)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The same image was listed more than once in a profile
    #[error("Configuration error: duplicated image '{0}' in list of images")]
    DuplicateImage(String),

    /// Window unit outside of minutes/hours/days/weeks/months
    #[error("Configuration error: unknown backup window unit '{0}'")]
    UnknownWindowUnit(String),

    /// Backup mode outside of full/incremental
    #[error("Configuration error: unknown backup mode '{0}'")]
    UnknownBackupMode(String),

    /// An external command (rbd, tar, ...) failed
    #[error("Remote command failed: {command}: {cause}")]
    RemoteCommandFailed { command: String, cause: String },

    /// An image or snapshot does not exist in the pool
    #[error("Not found in pool '{pool}': {reference}")]
    NotFound { pool: String, reference: String },

    /// Refusing to overwrite an existing export
    #[error("The destination file already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    /// Neither the raw nor the compressed export exists
    #[error("Cannot find file for deletion: {} or {}", .path.display(), .compressed.display())]
    ExportNotFound { path: PathBuf, compressed: PathBuf },

    /// A name does not carry a valid backup timestamp
    #[error("Malformed backup timestamp: {0}")]
    MalformedTimestamp(String),

    /// A file in an image directory does not follow the export naming scheme
    #[error("Unrecognized export file name: {0}")]
    UnrecognizedExport(String),

    /// Diff exports reference each other in a loop
    #[error("Corrupt export chain: cycle through snapshot '{0}'")]
    CorruptChain(String),

    /// Another process holds the image lock
    #[error("Image is locked by process {pid}: {}", .path.display())]
    Locked { path: PathBuf, pid: String },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON/YAML serialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// A failure while processing one image, with the step that failed
    #[error("{image}: {step} failed: {source}")]
    Image {
        image: String,
        step: &'static str,
        #[source]
        source: Box<BackupError>,
    },
}

impl BackupError {
    /// Create a remote command failure
    pub fn remote(command: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::RemoteCommandFailed {
            command: command.into(),
            cause: cause.into(),
        }
    }

    /// Create a "not found" error for an image or snapshot reference
    pub fn not_found(pool: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::NotFound {
            pool: pool.into(),
            reference: reference.into(),
        }
    }

    /// Attach the image and workflow step to this error
    pub fn during(self, image: &str, step: &'static str) -> Self {
        Self::Image {
            image: image.to_string(),
            step,
            source: Box::new(self),
        }
    }

    /// The underlying error, without image context
    pub fn root(&self) -> &BackupError {
        match self {
            Self::Image { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a pre-flight configuration error
    pub fn is_config(&self) -> bool {
        matches!(
            self.root(),
            Self::Config(_)
                | Self::DuplicateImage(_)
                | Self::UnknownWindowUnit(_)
                | Self::UnknownBackupMode(_)
        )
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. } | Self::ExportNotFound { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for BackupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for backup operations
pub type BackupResult<T> = Result<T, BackupError>;
